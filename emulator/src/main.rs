mod pid;
mod plant;
mod session;

use std::env;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process;

use session::Session;

fn main() -> io::Result<()> {
    let log_path = parse_log_path().unwrap_or_else(|err| {
        eprintln!("{err}");
        eprintln!("Usage: cycler-emulator [--log <path>]");
        process::exit(2);
    });

    let stdin = io::stdin();
    let mut reader = stdin.lock();
    let stdout = io::stdout();
    let mut writer = stdout.lock();
    let mut session = Session::new(&log_path)?;
    let mut line = String::new();

    writeln!(
        writer,
        "Thermocycler emulator ready. Type `help` for commands or `exit` to quit."
    )?;

    loop {
        line.clear();
        write!(writer, "> ")?;
        writer.flush()?;

        let bytes_read = reader.read_line(&mut line)?;
        if bytes_read == 0 {
            writeln!(writer)?;
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if should_terminate(trimmed) {
            writeln!(writer, "Session closed.")?;
            break;
        }

        let responses = session.handle_command(trimmed)?;
        for response in responses {
            writeln!(writer, "{response}")?;
        }
    }

    Ok(())
}

fn should_terminate(input: &str) -> bool {
    input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit")
}

fn parse_log_path() -> Result<PathBuf, String> {
    let mut args = env::args().skip(1);
    let mut log_path = PathBuf::from("cycler-emulator.log");

    while let Some(arg) = args.next() {
        if let Some(value) = arg.strip_prefix("--log=") {
            log_path = PathBuf::from(value);
        } else if arg == "--log" {
            match args.next() {
                Some(value) => log_path = PathBuf::from(value),
                None => return Err("Expected value after --log".to_string()),
            }
        } else {
            return Err(format!("Unknown argument `{arg}`"));
        }
    }

    Ok(log_path)
}
