//! Failure boundary around calls into extension code.

use crate::logging::sanitize_message;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

const MAX_FAULT_MESSAGE_CHARS: usize = 240;

/// Runs `call`, turning a panic into an error message.
///
/// The instance stays usable after a contained panic; the runtime records the
/// fault and keeps dispatching later calls to it.
pub(crate) fn contain<T>(call: impl FnOnce() -> T) -> Result<T, String> {
    catch_unwind(AssertUnwindSafe(call)).map_err(|payload| panic_message(payload.as_ref()))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    let message = if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    };
    sanitize_message(&message, MAX_FAULT_MESSAGE_CHARS)
}

#[cfg(test)]
mod tests {
    use super::contain;

    #[test]
    fn passes_through_values() {
        assert_eq!(contain(|| 7), Ok(7));
    }

    #[test]
    fn converts_panics_to_messages() {
        let err = contain(|| -> u8 { panic!("boom\nline") }).expect_err("panic is contained");
        assert_eq!(err, "boom line");

        let code = 42;
        let err = contain(|| -> u8 { panic!("code {code}") }).expect_err("formatted panic");
        assert_eq!(err, "code 42");
    }
}
