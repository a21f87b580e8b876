mod friends_tests;
mod store_tests;
