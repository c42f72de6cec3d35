//! Decode a sequence of varints given as hex bytes on the command line, one byte per argument,
//! and print each value in turn along with its zig-zag interpretation.

use wirebuf::{unzigzag, CodedInput};

fn main() {
    let mut bytes = Vec::new();
    for argument in std::env::args().skip(1) {
        match u8::from_str_radix(argument.trim_start_matches("0x"), 16) {
            Ok(x) => bytes.push(x),
            Err(e) => {
                eprintln!("don't know how to parse {argument}: {e}");
                std::process::exit(1);
            }
        }
    }
    let mut input = CodedInput::new(&bytes);
    while !input.is_at_end() {
        match input.read_varint() {
            Ok(x) => println!("{x} (zigzag {})", unzigzag(x)),
            Err(e) => {
                eprintln!("offset {}: {e}", input.position());
                std::process::exit(1);
            }
        }
    }
}
