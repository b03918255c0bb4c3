pub mod scrape;
pub mod split;
pub mod status;
