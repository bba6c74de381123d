use rpki_issuer::cli::{Options, run};

fn main() {
    match run(Options::from_args()) {
        Ok(outcome) => ::std::process::exit(outcome.exit_code()),
        Err(e) => {
            eprintln!("{}", e);
            ::std::process::exit(1);
        }
    }
}
