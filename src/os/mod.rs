pub mod config;
pub mod fault;
pub mod hardware;
pub mod linux_rt;
pub mod logs;
pub mod start;
