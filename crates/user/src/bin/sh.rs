// A very small shell: one command per line, cd and exit built in,
// everything else fork/exec'd from the root directory, with
// optional trailing & for background jobs.
#![no_std]

extern crate alloc;

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use ulib::{
    eprintln, print,
    process::Command,
    stdio::stdin,
    sys,
};

fn main() {
    let mut buf = [0u8; 256];
    loop {
        print!("$ ");
        let n = match stdin().read_line(&mut buf) {
            Ok(0) => return, // end of file
            Ok(n) => n,
            Err(_) => return,
        };
        let Ok(line) = core::str::from_utf8(&buf[..n]) else {
            eprintln!("sh: input is not utf-8");
            continue;
        };
        run(line.trim());
    }
}

fn run(line: &str) {
    let mut words: Vec<&str> = line.split_whitespace().collect();
    if words.is_empty() {
        return;
    }

    let background = words.last() == Some(&"&");
    if background {
        words.pop();
        if words.is_empty() {
            return;
        }
    }

    match words[0] {
        "exit" => {
            let code = words.get(1).and_then(|w| w.parse().ok()).unwrap_or(0);
            sys::exit(code)
        }
        "cd" => {
            let dir = words.get(1).copied().unwrap_or("/");
            if let Err(e) = sys::chdir(dir) {
                eprintln!("cd: {}: {}", dir, e);
            }
        }
        cmd => {
            // binaries live in the root directory.
            let path = if cmd.starts_with('/') || cmd.starts_with('.') {
                String::from(cmd)
            } else {
                format!("/{}", cmd)
            };
            let mut command = Command::new(&path);
            for arg in &words[1..] {
                command.arg(arg);
            }
            match command.spawn() {
                Ok(mut child) => {
                    if !background {
                        let _ = child.wait();
                    }
                }
                Err(e) => eprintln!("sh: {}: {}", cmd, e),
            }
        }
    }
}
