use std::path::Path;
use std::process::ExitCode;

fn main() -> ExitCode {
    env_logger::init();

    let input = match std::env::args().nth(1) {
        Some(p) => p,
        None => {
            eprintln!("usage: snuplc <file.mod>");
            return ExitCode::FAILURE;
        }
    };

    let source = match std::fs::read_to_string(&input) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{}: {}", input, e);
            return ExitCode::FAILURE;
        }
    };

    let asm = match snuplc::compile_to_string(&source) {
        Ok(asm) => asm,
        Err(e) => {
            // a single line:col: message on stderr
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let output = Path::new(&input).with_extension("s");
    if let Err(e) = std::fs::write(&output, asm) {
        eprintln!("{}: {}", output.display(), e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
