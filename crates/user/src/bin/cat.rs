#![no_std]

use ulib::{
    ExitCode, env, eprintln,
    fs::File,
    io::{Read, Write},
    stdio::{stdin, stdout},
    sys,
};

fn main() -> ExitCode {
    let args = env::args();

    if args.len() < 2 {
        if cat(stdin()).is_err() {
            return ExitCode::FAILURE;
        }
        return ExitCode::SUCCESS;
    }

    let mut failed = false;
    for arg in args.skip(1) {
        match File::open(arg) {
            Ok(file) => {
                if let Err(e) = cat(file) {
                    eprintln!("cat: {}: {}", arg, e);
                    failed = true;
                }
            }
            Err(e) => {
                eprintln!("cat: {}: {}", arg, e);
                failed = true;
            }
        }
    }
    if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS }
}

fn cat(mut reader: impl Read) -> sys::Result<()> {
    let mut buf = [0u8; 1024];

    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            return Ok(());
        }
        stdout().write_all(&buf[..n])?;
    }
}
