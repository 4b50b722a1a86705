//! Helpers shared by the integration tests.
#![allow(dead_code)]

use mepoo::{ErrorHandler, FatalError};
use std::sync::Mutex;

/// Keeps every fatal error it is handed and returns.
#[derive(Default)]
pub struct RecordingHandler(Mutex<Vec<FatalError>>);

impl RecordingHandler {
    pub fn errors(&self) -> Vec<FatalError> {
        self.0.lock().unwrap().clone()
    }
}

impl ErrorHandler for RecordingHandler {
    fn on_fatal(&self, error: &FatalError) {
        self.0.lock().unwrap().push(error.clone());
    }
}

pub fn as_bytes(words: &mut [u64]) -> &mut [u8] {
    let len = words.len() * 8;
    unsafe { std::slice::from_raw_parts_mut(words.as_mut_ptr().cast(), len) }
}
