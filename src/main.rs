fn main() {
    if let Err(err) = sql_loader::run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
