/// Display version information
pub fn execute() {
    println!("surfwatch {}", env!("CARGO_PKG_VERSION"));
    println!("Surf-lesson lead relay bot");
}
