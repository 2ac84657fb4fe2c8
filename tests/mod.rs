mod batch_tests;
mod device_tests;
mod support;
mod validation_tests;
