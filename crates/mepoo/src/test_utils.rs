//! Helpers shared by the unit tests.

use crate::errors::FatalError;
use crate::fatal::ErrorHandler;
use std::env;
use std::process::{Command, Stdio};
use std::sync::Mutex;

const ABORT_CHILD_ENV: &str = "MEPOO_ABORT_CHILD";

/// Keeps every fatal error it is handed and returns.
#[derive(Default)]
pub(crate) struct RecordingHandler(Mutex<Vec<FatalError>>);

impl RecordingHandler {
    pub(crate) fn errors(&self) -> Vec<FatalError> {
        self.0.lock().unwrap().clone()
    }
}

impl ErrorHandler for RecordingHandler {
    fn on_fatal(&self, error: &FatalError) {
        self.0.lock().unwrap().push(error.clone());
    }
}

pub(crate) fn as_bytes(words: &mut [u64]) -> &mut [u8] {
    let len = words.len() * 8;
    unsafe { std::slice::from_raw_parts_mut(words.as_mut_ptr().cast(), len) }
}

/// Whether this process is the child spawned by [`assert_aborts`] for `test_path`.
pub(crate) fn is_abort_child(test_path: &str) -> bool {
    env::var(ABORT_CHILD_ENV).is_ok_and(|value| value == test_path)
}

/// Run the test `test_path` (e.g. `fatal::tests::test_x`) again in a child
/// process and check that it was killed by `abort`, not by a panic or a
/// normal exit.
///
/// The test must run its aborting code only when [`is_abort_child`] holds.
pub(crate) fn assert_aborts(test_path: &str) {
    let status = Command::new(env::current_exe().unwrap())
        .args(["--exact", test_path, "--test-threads=1", "--nocapture"])
        .env(ABORT_CHILD_ENV, test_path)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .unwrap();

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        const SIGABRT: i32 = 6;
        assert_eq!(
            status.signal(),
            Some(SIGABRT),
            "{test_path} did not abort: {status}"
        );
    }
    #[cfg(not(unix))]
    assert!(!status.success(), "{test_path} did not abort: {status}");
}
