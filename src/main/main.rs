fn main() {
	if let Err(error) = fedsender::run() {
		eprintln!("{error}");
		std::process::exit(fedsender::exit_code(&error));
	}
}
