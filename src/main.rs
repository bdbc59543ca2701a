//! Command-line front end for the version-control history layer.
//!
//! Binary crate entry point. All CLI logic is in the `cli` module.

// mimalloc returns freed pages to the OS more eagerly than the system allocator.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

mod cli;

fn main() {
    cli::run();
}
