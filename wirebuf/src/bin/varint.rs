//! Print the varint encoding of each integer given on the command line as hex bytes.  Negative
//! arguments are zig-zag encoded first, the way sint64 fields travel.

use wirebuf::{stack_pack, v64, zigzag};

fn main() {
    let mut failed = false;
    for argument in std::env::args().skip(1) {
        let x = if let Ok(x) = argument.parse::<u64>() {
            x
        } else if let Ok(x) = argument.parse::<i64>() {
            zigzag(x)
        } else {
            eprintln!("don't know how to parse {argument}");
            failed = true;
            continue;
        };
        let bytes = stack_pack(v64::from(x)).to_vec();
        let hex: Vec<String> = bytes.iter().map(|b| format!("{b:02x}")).collect();
        println!("{argument}: {}", hex.join(" "));
    }
    if failed {
        std::process::exit(1);
    }
}
