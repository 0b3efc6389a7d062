use crate::CLAP_STYLING;
use clap::{ArgAction, arg, command, value_parser};

pub fn command_argument_builder() -> clap::Command {
    clap::Command::new("lightcycle")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("lightcycle")
        .styles(CLAP_STYLING)
        .arg(
            arg!(-q --"quiet" "Suppress progress output")
                .required(false)
                .global(true),
        )
        .arg(
            arg!(--"log-level" <LEVEL>)
                .required(false)
                .help("Log verbosity, written to stderr")
                .value_parser(["error", "warn", "info", "debug", "trace"])
                .default_value("info")
                .global(true),
        )
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            command!("crawl")
                .about(
                    "Crawl a web application in a headless browser and report every request it \
                can make.",
                )
                .arg(
                    arg!(<URL>)
                        .required(true)
                        .help("The seed URL; http:// is assumed when no scheme is given"),
                )
                .arg(
                    arg!(-H --"custom-headers" <JSON>)
                        .required(false)
                        .help(r#"Headers sent with every request, e.g. '{"Cookie": "sid=1"}'"#),
                )
                .arg(
                    arg!(-d --"max-depth" <DEPTH>)
                        .required(false)
                        .help("Maximum link distance from the seed")
                        .value_parser(value_parser!(usize))
                        .default_value("10"),
                )
                .arg(
                    arg!(-c --"concurrency" <NUM_TABS>)
                        .required(false)
                        .help("Number of browser tabs crawling at once")
                        .value_parser(value_parser!(usize))
                        .default_value("4"),
                )
                .arg(
                    arg!(--"page-timeout" <SECS>)
                        .required(false)
                        .help("Seconds a single page may take, events included")
                        .value_parser(value_parser!(u64))
                        .default_value("20"),
                )
                .arg(
                    arg!(-m --"max-requests" <NUM>)
                        .required(false)
                        .help("Stop after this many pages have been opened")
                        .value_parser(value_parser!(usize))
                        .default_value("200"),
                )
                .arg(
                    arg!(--"max-run-time" <SECS>)
                        .required(false)
                        .help("Wall-clock budget for the whole run")
                        .value_parser(value_parser!(u64))
                        .default_value("3600"),
                )
                .arg(
                    arg!(--"include-subdomains")
                        .required(false)
                        .help("Also crawl subdomains of the seed's root domain")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    arg!(--"path-prefix" <PREFIX>)
                        .required(false)
                        .help("Only crawl URLs whose path starts with this prefix"),
                )
                .arg(
                    arg!(-f --"filter-mode" <MODE>)
                        .required(false)
                        .help("Duplicate detection: simple keeps query values, smart groups them by shape")
                        .value_parser(["simple", "smart"])
                        .default_value("simple"),
                )
                .arg(
                    arg!(-e --"engine" <ENGINE>)
                        .required(false)
                        .help("Browser backend: chrome runs JavaScript, http only fetches documents")
                        .value_parser(["chrome", "http"])
                        .default_value("chrome"),
                )
                .arg(
                    arg!(--"chrome-path" <PATH>)
                        .required(false)
                        .help("Chromium executable (default: auto-detect)")
                        .conflicts_with("remote-url"),
                )
                .arg(
                    arg!(--"no-headless")
                        .required(false)
                        .help("Show the browser window")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    arg!(--"remote-url" <WS_URL>)
                        .required(false)
                        .help("DevTools websocket of an already running browser"),
                )
                .arg(
                    arg!(--"proxy" <URL>)
                        .required(false)
                        .help("Proxy for all crawl traffic"),
                )
                .arg(
                    arg!(--"custom-form-values" <TYPE_VALUE>)
                        .required(false)
                        .help(
                            "Form value per input category, e.g. mail=me@example.com. \
                        Categories: default, mail, code, phone, username, password, url, date, number",
                        )
                        .action(ArgAction::Append),
                )
                .arg(
                    arg!(--"custom-form-keyword-values" <KEYWORD_VALUE>)
                        .required(false)
                        .help("Form value for inputs whose name contains a keyword, e.g. coupon=FREE")
                        .action(ArgAction::Append),
                )
                .arg(
                    arg!(--"ignore-url-keywords" <KEYWORD>)
                        .required(false)
                        .help("Record but never open URLs containing this keyword (default: logout, quit, exit)")
                        .action(ArgAction::Append),
                )
                .arg(
                    arg!(--"robots-path")
                        .required(false)
                        .help("Seed the crawl with paths from robots.txt")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    arg!(--"fuzz-path")
                        .required(false)
                        .help("Seed the crawl by probing the bundled path wordlist")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    arg!(--"fuzz-path-dict" <PATH>)
                        .required(false)
                        .help("Probe paths from this wordlist instead of the bundled one"),
                )
                .arg(
                    arg!(-o --"output-mode" <MODE>)
                        .required(false)
                        .help("stdout output: json prints only the result document")
                        .value_parser(["json", "console", "none"])
                        .default_value("console"),
                )
                .arg(
                    arg!(--"output-json" <PATH>)
                        .required(false)
                        .help("Also write the result document to this file"),
                )
                .arg(
                    arg!(--"push-to-proxy" <URL>)
                        .required(false)
                        .help("Replay every discovered request through this proxy after the crawl"),
                )
                .arg(
                    arg!(--"push-pool-max" <NUM>)
                        .required(false)
                        .help("Concurrent replays when pushing to a proxy")
                        .value_parser(value_parser!(usize))
                        .default_value("10"),
                ),
        )
}
