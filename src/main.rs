fn main() {
    if let Err(e) = askchat::run() {
        eprintln!("askchat: {:#}", e);
        std::process::exit(1);
    }
}
