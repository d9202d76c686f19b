// Test modules for the forwarder
// Shared fixtures live in `mock`


mod binding_tests;
mod config_tests;
mod property_tests;
