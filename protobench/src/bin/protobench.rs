//! Benchmark serialization and parsing of (schema, input) pairs.

use std::sync::Arc;

use arrrg::CommandLine;
use indicio::{clue, stdio::StdioEmitter, ALWAYS, INFO};

use protobench::{load_input, run_test, ProtoBenchOptions, COLLECTOR};

const USAGE: &str =
    "Usage: protobench [--options] <schema name> <input data> [<schema name> <input data> ...]";

fn usage() -> ! {
    eprintln!("{USAGE}");
    eprintln!("The schema name is the full name of a message type, e.g. protobuf_unittest.TestAllTypes");
    eprintln!("(You can specify multiple pairs of schema name and input data.)");
    std::process::exit(1);
}

fn main() {
    let (options, free) = ProtoBenchOptions::from_command_line_relaxed(USAGE);
    if free.len() < 2 || free.len() % 2 != 0 {
        usage();
    }
    if options.verbose {
        COLLECTOR.register(Arc::new(StdioEmitter));
        COLLECTOR.set_verbosity(INFO);
    }
    clue!(COLLECTOR, ALWAYS, {
        new_process: std::env::args().collect::<Vec<_>>().join(" "),
    });
    let mut success = true;
    for pair in free.chunks(2) {
        let (schema, input) = (&pair[0], &pair[1]);
        println!("Benchmarking {} with file {}", schema, input);
        match load_input(schema, input, &options).and_then(|data| run_test(schema, &data, &options))
        {
            Ok(results) => {
                for result in results {
                    println!("{}", result);
                }
                println!();
            }
            Err(err) => {
                eprintln!("Error: {}", err);
                eprintln!();
                success = false;
            }
        }
    }
    if !success {
        std::process::exit(1);
    }
}
