use alloc_crate::string::String;
use alloc_crate::vec::Vec;

use crate::sys;

// fork/exec/wait wrapped the way std spells it.
pub struct Command {
    program: String,
    args: Vec<String>,
}

pub struct Child {
    pid: usize,
}

impl Command {
    pub fn new(program: &str) -> Command {
        Command {
            program: String::from(program),
            args: Vec::new(),
        }
    }

    pub fn arg(&mut self, arg: &str) -> &mut Command {
        self.args.push(String::from(arg));
        self
    }

    pub fn spawn(&mut self) -> sys::Result<Child> {
        match sys::fork()? {
            0 => {
                let mut argv: Vec<&str> = Vec::new();
                argv.push(&self.program);
                for a in self.args.iter() {
                    argv.push(a);
                }
                let err = sys::exec(&self.program, &argv).unwrap_err();
                crate::eprintln!("exec {} failed: {}", self.program, err);
                sys::exit(127)
            }
            pid => Ok(Child { pid }),
        }
    }
}

impl Child {
    pub fn pid(&self) -> usize {
        self.pid
    }

    // wait for this child; returns its exit status.
    pub fn wait(&mut self) -> sys::Result<i32> {
        loop {
            let mut status: i32 = 0;
            let pid = sys::wait(&mut status)?;
            if pid == self.pid {
                return Ok(status);
            }
            // reaped some other child; keep waiting for ours.
        }
    }
}

// wait for any child to exit; returns (pid, status).
pub fn wait_any() -> sys::Result<(usize, i32)> {
    let mut status: i32 = 0;
    let pid = sys::wait(&mut status)?;
    Ok((pid, status))
}
