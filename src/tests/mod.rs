mod common;
mod internalize_test;
