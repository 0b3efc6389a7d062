pub mod crawl;
pub mod push;
pub mod report;
pub mod seed;
