#![allow(dead_code)]

pub mod harness;
pub mod net;
pub mod upstream;

pub use harness::{ProxyHarness, ProxyHarnessBuilder, test_settings};
pub use net::{read_exactly, read_to_close, read_until_double_crlf};
pub use upstream::TestUpstream;
