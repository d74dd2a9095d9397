//! Wires a small service graph, intercepts one of its methods and drives it
//! from the console.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use weft::{
    intercept, returns, take_return, AnyRule, ArgBag, CallHandler, CallReturn, ConfigError,
    Container, ContainerControlled, DependencySpec, DynError, InterceptionPolicy, Mechanism,
    MethodCall, MethodProfile, Next, PipelineSet, RegistrationSource, TypeDescriptor,
};

struct AppConfig {
    greeting: String,
}

trait Greeter: Send + Sync {
    fn greet(&self, name: &str) -> Result<String, DynError>;
}

struct ConfiguredGreeter {
    config: Arc<AppConfig>,
    served: AtomicUsize,
}

impl Greeter for ConfiguredGreeter {
    fn greet(&self, name: &str) -> Result<String, DynError> {
        self.served.fetch_add(1, Ordering::SeqCst);
        Ok(format!("{} {}", self.config.greeting, name))
    }
}

/// Logs around every intercepted call
struct CallLogger;
impl CallHandler for CallLogger {
    fn invoke(&self, call: &mut MethodCall, next: Next<'_>) -> CallReturn {
        tracing::info!(method = call.method, "call entering pipeline");
        let result = next.invoke(call);
        tracing::info!(method = call.method, ok = result.is_ok(), "call left pipeline");
        result
    }
}

struct GreeterProxy {
    target: Arc<dyn Greeter>,
    pipelines: Arc<PipelineSet>,
}
impl Greeter for GreeterProxy {
    fn greet(&self, name: &str) -> Result<String, DynError> {
        let mut call = MethodCall::new("greet", ArgBag::new().with(name.to_string()));
        let target = &self.target;
        let result = self.pipelines.invoke(&mut call, |call| {
            let name: &String = call.args.get(0)?;
            returns(target.greet(name)?)
        })?;
        Ok(take_return::<String>(result)?)
    }
}

/// The application's registrations, fed through the container's source seam
struct GreeterModule;
impl RegistrationSource for GreeterModule {
    fn apply(&self, container: &Container) -> Result<(), ConfigError> {
        container.register_descriptor(
            TypeDescriptor::describe::<ConfiguredGreeter>()
                .constructor(vec![DependencySpec::of::<AppConfig>()], |args| {
                    Ok(ConfiguredGreeter {
                        config: args.get::<AppConfig>(0)?,
                        served: AtomicUsize::new(0),
                    })
                })
                .build(),
        );
        container
            .register::<dyn Greeter>()
            .to::<ConfiguredGreeter>(|greeter| greeter as Arc<dyn Greeter>)
            .lifetime(ContainerControlled::new())
            .apply()
    }
}

fn run() -> Result<(), DynError> {
    let container = Container::new();
    container
        .register::<AppConfig>()
        .instance(Arc::new(AppConfig {
            greeting: "hello".to_string(),
        }))
        .apply()?;
    container.install(&GreeterModule)?;

    intercept::<dyn Greeter>(
        &container,
        None,
        Mechanism::InterfaceProxy,
        InterceptionPolicy::new().with(vec![Arc::new(AnyRule)], vec![Arc::new(CallLogger)]),
        &[MethodProfile::new("greet")],
        |target, pipelines| Arc::new(GreeterProxy { target, pipelines }),
    )?;

    for info in container.registrations() {
        println!("registered: {} [{}]", info.key, info.lifetime);
    }

    let greeter = container.resolve::<dyn Greeter>()?;
    println!("{}", greeter.greet("weft")?);
    println!("{}", greeter.greet("again")?);

    container.dispose()?;
    Ok(())
}

fn main() {
    tracing_subscriber::fmt().with_target(false).init();

    if let Err(error) = run() {
        eprintln!("demo failed: {error}");
        std::process::exit(1);
    }
}
