#[cfg(test)]
mod unit_tests;
