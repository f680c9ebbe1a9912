//! Worker threads driving a loop-owned object and raising events that carry data.
//!
//! Run with `cargo run --example spam`; set `RUST_LOG=loop_bridge=trace` for the bridge's logs.

use std::thread;
use std::time::Duration;

use loop_bridge::{
    proxy_methods, BridgeConfig, DataEvent, EventDataRegistry, EventLoop, ProxyBuilder, ProxyError,
    Target,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

struct Spam {
    eggs: u32,
}

impl Spam {
    fn ham(&mut self, foo: String, bar: String) -> String {
        self.eggs += 1;
        format!("{bar}{foo}{bar}")
    }

    fn eggs(&self) -> u32 {
        self.eggs
    }
}

proxy_methods! {
    trait SpamProxy for Spam {
        fn ham(foo: String, bar: String) -> String;
        fn eggs() -> u32;
    }
}

struct Foo;

impl Foo {
    fn square(&self, x: f64) -> f64 {
        x * x
    }

    fn boom(&self, x: f64) -> Result<f64, std::io::Error> {
        if x == 0.0 {
            return Err(std::io::Error::other("refusing to divide by zero"));
        }
        Ok(1.0 / x)
    }
}

#[derive(Debug)]
struct Progress {
    worker: usize,
    percent: u8,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = BridgeConfig::from_toml_str("call_timeout_ms = 2000")?;
    let event_loop = EventLoop::new();
    let handle = event_loop.handle();

    let registry = EventDataRegistry::with_config(handle.clone(), &config);
    let builder = ProxyBuilder::with_config(handle.clone(), &config);

    let root = Target::root();
    registry.bind(&root, "<<progress>>", false, |event: &DataEvent<Progress>| {
        let progress = event.data();
        info!(worker = progress.worker, percent = progress.percent, "progress");
        Ok(())
    })?;

    let spam = builder.proxy(Spam { eggs: 0 });
    let foo = builder.mute_proxy_with_handler(Foo, |err: &ProxyError| {
        info!(error = %err, "mute call failed");
    });

    let workers: Vec<_> = (0..2)
        .map(|worker| {
            let (registry, spam, foo, root) = (registry.clone(), spam.clone(), foo.clone(), root.clone());
            thread::spawn(move || -> Result<(), ProxyError> {
                for step in 1..=4_u8 {
                    let greeting = spam.ham(format!("oof{worker}"), "--".to_string())?;
                    info!(worker, greeting, "ham answered");
                    foo.call(move |foo| {
                        info!(square = foo.square(f64::from(step)), "squared");
                    });
                    foo.try_call(move |foo| foo.boom(f64::from(step % 2)).map(|_| ()));
                    registry
                        .event_generate(&root, "<<progress>>", Progress { worker, percent: step * 25 })
                        .map_err(ProxyError::from)?;
                    thread::sleep(Duration::from_millis(10));
                }
                Ok(())
            })
        })
        .collect();

    let quit = handle.clone();
    let watcher = thread::spawn(move || {
        let results: Vec<_> = workers.into_iter().map(|worker| worker.join()).collect();
        match spam.eggs() {
            Ok(eggs) => info!(eggs, "all workers done"),
            Err(err) => info!(error = %err, "could not count eggs"),
        }
        quit.quit();
        results
    });

    event_loop.run();

    for result in watcher.join().map_err(|_| "watcher thread panicked")? {
        result.map_err(|_| "worker thread panicked")??;
    }
    info!(pending = registry.pending(), "event loop finished");
    Ok(())
}
