use std::{env, process};

#[cfg(feature = "jemalloc")]
#[global_allocator]
static GLOBAL: jemallocator::Jemalloc = jemallocator::Jemalloc;

fn main() {
    let args: Vec<String> = env::args().collect();

    let config = qsat::QsatConfig::new(&args);

    let result = config.run().unwrap_or_else(|err| {
        eprintln!("Problem while solving: {}", err);
        process::exit(1);
    });

    process::exit(result as i32);
}
