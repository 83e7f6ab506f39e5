pub mod catalog;
pub mod download;
pub mod evaluate;
pub mod extract;
pub mod fetch;
pub mod merge;
pub mod oplog;
pub mod report;
