pub mod drive;
pub mod localhost;
#[cfg(test)]
pub mod memory;
pub mod remote;
