//! Transport clients (subprocess, ipmitool, SSH, HTTP) and output parsers.

pub mod executor;
pub mod http;
pub mod ipmitool;
pub mod parser;
pub mod ssh;
pub mod xml;
