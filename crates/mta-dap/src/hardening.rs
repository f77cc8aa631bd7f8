use std::any::Any;
use std::sync::Once;

use mta_config::{init_tracing_with_config, AdapterConfig};

static PANIC_HOOK: Once = Once::new();

/// Initialize structured logging and install a global panic hook for the adapter process.
///
/// The hook records the panic through `tracing` (so it reaches the configured log file)
/// before handing over to the previously installed hook.
pub fn init(config: &AdapterConfig) {
    init_tracing_with_config(config);
    install_panic_hook();
}

fn install_panic_hook() {
    PANIC_HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let location = info.location().map(|loc| loc.to_string());
            tracing::error!(
                target: "mta_dap::panic",
                message = %panic_message(info.payload()),
                location = location.as_deref().unwrap_or("<unknown>"),
                "adapter panicked"
            );
            previous(info);
        }));
    });
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}
