pub mod discovery;
pub mod endpoint;
pub mod messaging;
pub mod util;

#[cfg(test)]
pub mod test_util;
