pub mod common;

mod campaign_tests;
mod queue_tests;
