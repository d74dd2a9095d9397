//! Behavior tests for the container core: registration, lifetimes, the
//! hierarchy and failure reporting.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

use weft::{
    ConfigError, Container, ContainerControlled, Deferred, DependencySpec, ExternallyControlled,
    GenericFamily, GenericShape, Hierarchical, LifetimeManager, PerResolve, RegistrationSource,
    ResolveError, Transient, TypeDescriptor, TypeInfo,
};

#[derive(Debug)]
struct Leaf {
    tag: u32,
}

struct Node {
    leaf: Arc<Leaf>,
}

fn leaf_descriptor() -> TypeDescriptor {
    TypeDescriptor::describe::<Leaf>()
        .constructor(vec![], |_| Ok(Leaf { tag: 7 }))
        .build()
}

fn node_descriptor() -> TypeDescriptor {
    TypeDescriptor::describe::<Node>()
        .constructor(vec![DependencySpec::of::<Leaf>()], |args| {
            Ok(Node {
                leaf: args.get::<Leaf>(0)?,
            })
        })
        .build()
}

trait Greeter: Send + Sync + std::fmt::Debug {
    fn greet(&self) -> &'static str;
}
#[derive(Debug)]
struct English;
impl Greeter for English {
    fn greet(&self) -> &'static str {
        "hello"
    }
}
#[derive(Debug)]
struct French;
impl Greeter for French {
    fn greet(&self) -> &'static str {
        "bonjour"
    }
}

fn greeter_descriptor<G: Greeter + Default + Send + Sync + 'static>() -> TypeDescriptor {
    TypeDescriptor::describe::<G>()
        .constructor(vec![], |_| Ok(G::default()))
        .build()
}

impl Default for English {
    fn default() -> Self {
        English
    }
}
impl Default for French {
    fn default() -> Self {
        French
    }
}

#[test]
fn unregistered_concrete_type_resolves_through_its_descriptor() {
    let container = Container::new();
    container.register_descriptor(leaf_descriptor());
    container.register_descriptor(node_descriptor());

    let node = container.resolve::<Node>().unwrap();
    let independent = container.resolve::<Leaf>().unwrap();
    assert_eq!(node.leaf.tag, independent.tag);
    // The fallback is transient: each resolve constructs anew
    assert!(!Arc::ptr_eq(&node.leaf, &independent));
}

#[test]
fn unregistered_trait_object_is_not_constructable() {
    let container = Container::new();
    let err = container.resolve::<dyn Greeter>().unwrap_err();
    assert!(matches!(
        err,
        ResolveError::Config(ConfigError::NotConstructable { .. })
    ));
}

#[test]
fn container_controlled_yields_one_instance_for_container_and_children() {
    let container = Container::new();
    container.register_descriptor(leaf_descriptor());
    container
        .register::<Leaf>()
        .lifetime(ContainerControlled::new())
        .apply()
        .unwrap();

    let first = container.resolve::<Leaf>().unwrap();
    let second = container.resolve::<Leaf>().unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    let child = container.create_child();
    let via_child = child.resolve::<Leaf>().unwrap();
    assert!(Arc::ptr_eq(&first, &via_child));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let container = container.clone();
        handles.push(std::thread::spawn(move || {
            container.resolve::<Leaf>().unwrap()
        }));
    }
    for handle in handles {
        assert!(Arc::ptr_eq(&first, &handle.join().unwrap()));
    }
}

#[test]
fn hierarchical_lifetime_caches_per_container_level() {
    let container = Container::new();
    container.register_descriptor(leaf_descriptor());
    container
        .register::<Leaf>()
        .lifetime(Hierarchical::new())
        .apply()
        .unwrap();

    let left = container.create_child();
    let right = container.create_child();

    let left_first = left.resolve::<Leaf>().unwrap();
    let left_second = left.resolve::<Leaf>().unwrap();
    let right_first = right.resolve::<Leaf>().unwrap();

    assert!(Arc::ptr_eq(&left_first, &left_second));
    assert!(!Arc::ptr_eq(&left_first, &right_first));
}

#[derive(Debug)]
struct CycleA;
#[derive(Debug)]
struct CycleB;

#[test]
fn dependency_cycles_fail_citing_both_keys() {
    let container = Container::new();
    container.register_descriptor(
        TypeDescriptor::describe::<CycleA>()
            .constructor(vec![DependencySpec::of::<CycleB>()], |_| Ok(CycleA))
            .build(),
    );
    container.register_descriptor(
        TypeDescriptor::describe::<CycleB>()
            .constructor(vec![DependencySpec::of::<CycleA>()], |_| Ok(CycleB))
            .build(),
    );

    let err = container.resolve::<CycleA>().unwrap_err();
    match err.root_cause() {
        ResolveError::DependencyCycle { chain } => {
            let rendered: Vec<String> = chain.iter().map(|key| key.to_string()).collect();
            assert!(rendered.iter().any(|key| key.contains("CycleA")));
            assert!(rendered.iter().any(|key| key.contains("CycleB")));
        }
        other => panic!("expected a dependency cycle, got {other}"),
    }
}

fn register_tracked(container: &Container, counter: &Arc<AtomicUsize>) {
    let counter = counter.clone();
    container.register_descriptor(leaf_descriptor());
    container
        .register::<Leaf>()
        .lifetime(ContainerControlled::new())
        .with_dispose(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .apply()
        .unwrap();
}

#[test]
fn dispose_reaches_every_level_exactly_once() {
    let root = Container::new();
    let child = root.create_child();
    let grandchild = child.create_child();

    let root_drops = Arc::new(AtomicUsize::new(0));
    let child_drops = Arc::new(AtomicUsize::new(0));
    let grandchild_drops = Arc::new(AtomicUsize::new(0));
    register_tracked(&root, &root_drops);
    register_tracked(&child, &child_drops);
    register_tracked(&grandchild, &grandchild_drops);

    root.resolve::<Leaf>().unwrap();
    child.resolve::<Leaf>().unwrap();
    grandchild.resolve::<Leaf>().unwrap();

    // A child disposed ahead of its parent is not disposed twice
    grandchild.dispose().unwrap();
    assert_eq!(grandchild_drops.load(Ordering::SeqCst), 1);

    root.dispose().unwrap();
    assert_eq!(root_drops.load(Ordering::SeqCst), 1);
    assert_eq!(child_drops.load(Ordering::SeqCst), 1);
    assert_eq!(grandchild_drops.load(Ordering::SeqCst), 1);

    // Second dispose is a no-op
    root.dispose().unwrap();
    assert_eq!(root_drops.load(Ordering::SeqCst), 1);

    assert!(matches!(
        root.resolve::<Leaf>(),
        Err(ResolveError::ContainerDisposed)
    ));
}

#[test]
fn failed_disposers_do_not_stop_the_rest() {
    let container = Container::new();
    let good_drops = Arc::new(AtomicUsize::new(0));

    container
        .register::<String>()
        .named("broken")
        .instance(Arc::new("broken".to_string()))
        .with_dispose(|_| Err("disposer failed".into()))
        .apply()
        .unwrap();
    let counter = good_drops.clone();
    container
        .register::<String>()
        .named("fine")
        .instance(Arc::new("fine".to_string()))
        .with_dispose(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .apply()
        .unwrap();

    let report = container.dispose().unwrap_err();
    assert_eq!(report.failures.len(), 1);
    assert_eq!(good_drops.load(Ordering::SeqCst), 1);
}

#[test]
fn resolve_all_returns_named_instances_in_registration_order() {
    let container = Container::new();
    container
        .register::<dyn Greeter>()
        .named("x")
        .instance(Arc::new(English))
        .apply()
        .unwrap();
    // Unrelated registration between the two named ones
    container.register_descriptor(leaf_descriptor());
    container.register::<Leaf>().apply().unwrap();
    container
        .register::<dyn Greeter>()
        .named("y")
        .instance(Arc::new(French))
        .apply()
        .unwrap();
    // The unnamed default registration stays out of the snapshot
    container
        .register::<dyn Greeter>()
        .instance(Arc::new(English))
        .apply()
        .unwrap();

    let all = container.resolve_all::<dyn Greeter>().unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].greet(), "hello");
    assert_eq!(all[1].greet(), "bonjour");
}

#[test]
fn reregistration_invalidates_the_compiled_plan() {
    let container = Container::new();
    container.register_descriptor(greeter_descriptor::<English>());
    container.register_descriptor(greeter_descriptor::<French>());

    container
        .register::<dyn Greeter>()
        .to::<English>(|english| english as Arc<dyn Greeter>)
        .apply()
        .unwrap();
    assert_eq!(container.resolve::<dyn Greeter>().unwrap().greet(), "hello");

    container
        .register::<dyn Greeter>()
        .to::<French>(|french| french as Arc<dyn Greeter>)
        .apply()
        .unwrap();
    assert_eq!(
        container.resolve::<dyn Greeter>().unwrap().greet(),
        "bonjour"
    );
}

#[test]
fn children_inherit_and_shadow_parent_policies() {
    let parent = Container::new();
    parent.register_descriptor(greeter_descriptor::<English>());
    parent.register_descriptor(greeter_descriptor::<French>());
    parent
        .register::<dyn Greeter>()
        .to::<English>(|english| english as Arc<dyn Greeter>)
        .apply()
        .unwrap();

    let child = parent.create_child();
    assert_eq!(child.resolve::<dyn Greeter>().unwrap().greet(), "hello");

    child
        .register::<dyn Greeter>()
        .to::<French>(|french| french as Arc<dyn Greeter>)
        .apply()
        .unwrap();
    assert_eq!(child.resolve::<dyn Greeter>().unwrap().greet(), "bonjour");
    assert_eq!(parent.resolve::<dyn Greeter>().unwrap().greet(), "hello");
}

struct Shared;
struct SharedPair {
    first: Arc<Shared>,
    second: Arc<Shared>,
}

#[test]
fn per_resolve_is_shared_within_one_call_only() {
    let container = Container::new();
    container.register_descriptor(
        TypeDescriptor::describe::<Shared>()
            .constructor(vec![], |_| Ok(Shared))
            .build(),
    );
    container.register_descriptor(
        TypeDescriptor::describe::<SharedPair>()
            .constructor(
                vec![DependencySpec::of::<Shared>(), DependencySpec::of::<Shared>()],
                |args| {
                    Ok(SharedPair {
                        first: args.get::<Shared>(0)?,
                        second: args.get::<Shared>(1)?,
                    })
                },
            )
            .build(),
    );
    container
        .register::<Shared>()
        .lifetime(PerResolve::new())
        .apply()
        .unwrap();

    let pair = container.resolve::<SharedPair>().unwrap();
    assert!(Arc::ptr_eq(&pair.first, &pair.second));

    let next_pair = container.resolve::<SharedPair>().unwrap();
    assert!(!Arc::ptr_eq(&pair.first, &next_pair.first));
}

struct Stamp {
    serial: usize,
}
struct StampPress {
    press: Deferred<Stamp>,
}

#[test]
fn deferred_dependencies_resolve_fresh_on_each_invoke() {
    let container = Container::new();
    container
        .register::<AtomicUsize>()
        .instance(Arc::new(AtomicUsize::new(0)))
        .apply()
        .unwrap();
    container.register_descriptor(
        TypeDescriptor::describe::<Stamp>()
            .constructor(vec![DependencySpec::of::<AtomicUsize>()], |args| {
                Ok(Stamp {
                    serial: args.get::<AtomicUsize>(0)?.fetch_add(1, Ordering::SeqCst),
                })
            })
            .build(),
    );
    container.register_descriptor(
        TypeDescriptor::describe::<StampPress>()
            .constructor(vec![DependencySpec::deferred::<Stamp>()], |args| {
                Ok(StampPress {
                    press: args.get_deferred::<Stamp>(0)?,
                })
            })
            .build(),
    );

    let press = container.resolve::<StampPress>().unwrap();
    assert_eq!(press.press.resolve().unwrap().serial, 0);
    assert_eq!(press.press.resolve().unwrap().serial, 1);

    container.dispose().unwrap();
    assert!(matches!(
        press.press.resolve(),
        Err(ResolveError::ContainerDisposed)
    ));
}

struct Repo<T: Send + Sync + 'static> {
    label: &'static str,
    _marker: std::marker::PhantomData<fn() -> T>,
}
struct User;

impl GenericShape for Repo<User> {
    fn family() -> GenericFamily {
        GenericFamily {
            name: "Repo",
            arity: 1,
        }
    }
    fn type_args() -> Vec<TypeInfo> {
        vec![TypeInfo::of::<User>()]
    }
}

#[derive(Debug)]
struct WrongArity;
impl GenericShape for WrongArity {
    fn family() -> GenericFamily {
        GenericFamily {
            name: "Repo",
            arity: 2,
        }
    }
    fn type_args() -> Vec<TypeInfo> {
        vec![TypeInfo::of::<User>(), TypeInfo::of::<u32>()]
    }
}

#[test]
fn open_generics_bind_closed_requests_and_check_arity() {
    let container = Container::new();
    container.register_open_generic(
        GenericFamily {
            name: "Repo",
            arity: 1,
        },
        || Arc::new(Transient::new()),
        |generic| {
            if generic.args[0] == TypeInfo::of::<User>() {
                Ok(TypeDescriptor::describe::<Repo<User>>()
                    .constructor(vec![], |_| {
                        Ok(Repo {
                            label: "users",
                            _marker: std::marker::PhantomData,
                        })
                    })
                    .build())
            } else {
                Err(format!("no binding for {}", generic.args[0]))
            }
        },
    );

    let repo = container.resolve_generic::<Repo<User>>().unwrap();
    assert_eq!(repo.label, "users");

    let err = container.resolve_generic::<WrongArity>().unwrap_err();
    assert!(matches!(
        err,
        ResolveError::Config(ConfigError::GenericArityMismatch { got: 2, .. })
    ));
}

#[test]
fn a_lifetime_manager_serves_exactly_one_registration() {
    let container = Container::new();
    let manager: Arc<dyn LifetimeManager> = Arc::new(ContainerControlled::new());

    container
        .register::<Leaf>()
        .lifetime_arc(manager.clone())
        .apply()
        .unwrap();
    let err = container
        .register::<Node>()
        .lifetime_arc(manager)
        .apply()
        .unwrap_err();
    assert!(matches!(err, ConfigError::LifetimeReused { .. }));
}

#[test]
fn externally_controlled_instances_are_not_kept_alive() {
    let container = Container::new();
    let external = Arc::new(Leaf { tag: 3 });
    container
        .register::<Leaf>()
        .instance(external.clone())
        .lifetime(ExternallyControlled::<Leaf>::new())
        .apply()
        .unwrap();

    let resolved = container.resolve::<Leaf>().unwrap();
    assert!(Arc::ptr_eq(&external, &resolved));

    drop(resolved);
    drop(external);
    let err = container.resolve::<Leaf>().unwrap_err();
    assert!(matches!(
        err.root_cause(),
        ResolveError::InstanceExpired { .. }
    ));
}

struct Gauge {
    level: Mutex<u32>,
    wired: Mutex<bool>,
}

#[test]
fn properties_and_methods_inject_after_construction() {
    let container = Container::new();
    container
        .register::<u32>()
        .instance(Arc::new(42_u32))
        .apply()
        .unwrap();
    container
        .register::<Gauge>()
        .use_constructor(vec![], |_| {
            Ok(Gauge {
                level: Mutex::new(0),
                wired: Mutex::new(false),
            })
        })
        .property("level", DependencySpec::of::<u32>(), |gauge, args| {
            *gauge.level.lock().unwrap() = *args.get::<u32>(0)?;
            Ok(())
        })
        .method("wire", vec![], |gauge, _| {
            *gauge.wired.lock().unwrap() = true;
            Ok(())
        })
        .apply()
        .unwrap();

    let gauge = container.resolve::<Gauge>().unwrap();
    assert_eq!(*gauge.level.lock().unwrap(), 42);
    assert!(*gauge.wired.lock().unwrap());
}

#[derive(Debug)]
struct Flaky;
#[derive(Debug)]
struct NeedsFlaky {
    _flaky: Arc<Flaky>,
}

#[test]
fn construction_failures_carry_the_causal_chain() {
    let container = Container::new();
    container.register_descriptor(
        TypeDescriptor::describe::<Flaky>()
            .constructor(vec![], |_| Err("boom".into()))
            .build(),
    );
    container.register_descriptor(
        TypeDescriptor::describe::<NeedsFlaky>()
            .constructor(vec![DependencySpec::of::<Flaky>()], |args| {
                Ok(NeedsFlaky {
                    _flaky: args.get::<Flaky>(0)?,
                })
            })
            .build(),
    );

    let err = container.resolve::<NeedsFlaky>().unwrap_err();
    let path = err.failure_path();
    assert_eq!(path.len(), 2);
    assert!(path[0].to_string().contains("NeedsFlaky"));
    assert!(path[1].to_string().contains("Flaky"));
    match err.root_cause() {
        ResolveError::Construction { source, .. } => {
            assert_eq!(source.to_string(), "boom");
        }
        other => panic!("expected a construction failure, got {other}"),
    }
}

struct GreeterModule;
impl RegistrationSource for GreeterModule {
    fn apply(&self, container: &Container) -> Result<(), ConfigError> {
        container.register_descriptor(greeter_descriptor::<English>());
        container
            .register::<dyn Greeter>()
            .to::<English>(|english| english as Arc<dyn Greeter>)
            .apply()
    }
}

#[test]
fn registration_sources_feed_the_container() {
    let container = Container::new();
    container.install(&GreeterModule).unwrap();
    assert!(container.is_registered::<dyn Greeter>(None));
    assert_eq!(container.resolve::<dyn Greeter>().unwrap().greet(), "hello");

    let infos = container.registrations();
    assert_eq!(infos.len(), 1);
    assert!(infos[0].mapped_to.unwrap().contains("English"));
}
