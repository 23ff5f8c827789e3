#[cfg(test)]
mod crossbar_tests;
#[cfg(test)]
mod lane_tests;
