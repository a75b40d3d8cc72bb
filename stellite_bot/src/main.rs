use bot_commons::*;

fn main() {
    if std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", "WARN,stellite_bot=debug");
    }
    let lifecycle = start_everything(stellite_bot::entry());
    std::process::exit(lifecycle.exit_code());
}
