pub mod cycle_logger;
pub mod player_shell;
pub mod sync_loop;

#[cfg(test)]
pub(crate) mod test_support;
