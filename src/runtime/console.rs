use std::io::{self, stdin, stdout, BufRead, IsTerminal, Write};

use console::Term;

use crate::isa::Register;

/// Where `in` reads from and `out` writes to.
pub trait Console {
    fn read_int(&mut self, iep: usize, reg: Register) -> io::Result<i16>;
    fn write_int(&mut self, iep: usize, reg: Register, value: i16) -> io::Result<()>;
}

/// Prompts on stdout and reads decimal integers from stdin.
#[derive(Clone, Copy, Debug, Default)]
pub struct StdConsole;

impl Console for StdConsole {
    fn read_int(&mut self, iep: usize, reg: Register) -> io::Result<i16> {
        print!("IEP: {iep:#06x} Enter value into {reg}:");
        stdout().flush()?;
        let line = read_line()?;
        line.trim()
            .parse()
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, format!("`{}`: {err}", line.trim())))
    }

    fn write_int(&mut self, iep: usize, reg: Register, value: i16) -> io::Result<()> {
        println!("IEP: {iep:#06x} Value of {reg}: {value}");
        Ok(())
    }
}

// Read one line from stdin or the terminal
fn read_line() -> io::Result<String> {
    if stdin().is_terminal() {
        Term::stdout().read_line()
    } else {
        let mut line = String::new();
        if stdin().lock().read_line(&mut line)? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "input ended before a value was read",
            ));
        }
        Ok(line)
    }
}
