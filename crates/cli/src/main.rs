fn main() -> std::process::ExitCode {
    ticketdesk_cli::run()
}
