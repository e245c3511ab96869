pub mod button;
pub mod coordinator;
pub mod driver;
pub mod error;
pub mod executor;
pub mod summary;

#[cfg(test)]
mod tests;
