#![allow(dead_code)]

pub mod logs;
pub mod mock_server;
pub mod stores;
