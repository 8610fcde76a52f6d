use clap::ValueEnum;
use pinshare_core::ShareInfo;

/// Which downloader the printed command line is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputStyle {
    Curl,
    Wget,
}

/// A command the receiving side can paste as-is. Certificate verification is
/// off because the certificate is self-signed; the key pin replaces it.
pub fn client_command(style: OutputStyle, info: &ShareInfo) -> String {
    let pin = info.pin.curl_form();
    match style {
        OutputStyle::Curl => format!(
            "curl --insecure --pinnedpubkey {} --output {} {}",
            sh_quote(&pin),
            sh_quote(&info.filename),
            sh_quote(&info.url)
        ),
        OutputStyle::Wget => format!(
            "wget --no-check-certificate --pinnedpubkey={} --output-document={} {}",
            sh_quote(&pin),
            sh_quote(&info.filename),
            sh_quote(&info.url)
        ),
    }
}

/// POSIX single-quote a word.
fn sh_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}
