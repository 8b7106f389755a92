fn main() {
    if let Err(err) = xcforge::run() {
        eprintln!("Error: {:#}", err);
        std::process::exit(xcforge::exit_code(&err));
    }
}
