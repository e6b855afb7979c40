mod common;
mod http_driver_tests;
mod image_client_tests;
mod session_tests;
