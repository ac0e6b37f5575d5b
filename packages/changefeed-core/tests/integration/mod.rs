//! Integration tests driving notifiers end to end against the in-memory
//! engine:
//! 1. Single-threaded notification passes replayed onto an owner-side view
//! 2. A background worker thread handing over to the owning thread
//! 3. Failure delivery and callback lifecycle

mod helpers;
mod lifecycle_tests;
mod pipeline_tests;
mod threaded_tests;
