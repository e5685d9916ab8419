fn main() {
    dlower::cli::run();
}
