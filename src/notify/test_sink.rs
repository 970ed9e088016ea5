use async_trait::async_trait;

use super::{NotifyArgs, NotifyError, Notifier};

/// The `TEST` sink: writes the message to stderr and always succeeds,
/// mirroring `notify_via_test`'s `print(..., file=sys.stderr)`.
pub struct TestNotifier;

#[async_trait]
impl Notifier for TestNotifier {
    async fn notify(&self, args: &NotifyArgs) -> Result<(), NotifyError> {
        match args {
            NotifyArgs::Test { message } => {
                eprintln!("[TEST notifier] {message}");
                Ok(())
            }
            other => Err(NotifyError::InvalidArgs(format!("TEST notifier received {other:?}"))),
        }
    }
}
