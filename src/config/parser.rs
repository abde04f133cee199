//! Recursive-descent parser for the configuration grammar.
//!
//! Directive names map to setter arms in a single `match` per scope; the
//! tree is validated (inheritance resolved, structural errors rejected)
//! before it is handed to the caller, so a successfully loaded `Config`
//! needs no further checking at request time.

use std::time::Duration;

use log::info;

use super::lexer::{tokenize, Spanned, Token};
use super::{
    parse_size, validate, Config, ConfigError, ListenAddress,
    LocationConfig, Redirect, ServerConfig, Tunables,
};

/// Reads and parses a configuration file.
pub fn load(path: &str) -> Result<Config, ConfigError> {
    let text = std::fs::read_to_string(path)?;
    let config = parse(&text)?;
    info!(
        "loaded configuration: {} server block(s) from {}",
        config.servers.len(),
        path
    );
    Ok(config)
}

/// Parses configuration text into a validated tree.
pub fn parse(text: &str) -> Result<Config, ConfigError> {
    let tokens = tokenize(text);
    let mut parser = Parser { tokens: &tokens, pos: 0 };
    parser.parse_top()
}

struct Parser<'a> {
    tokens: &'a [Spanned],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos.min(self.tokens.len().saturating_sub(1)))
            .map(|s| s.line)
            .unwrap_or(0)
    }

    fn next(&mut self) -> Option<&'a Spanned> {
        let t = self.tokens.get(self.pos);
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expect_word(&mut self) -> Result<&'a str, ConfigError> {
        let line = self.line();
        match self.next().map(|s| &s.token) {
            Some(Token::Word(w)) => Ok(w),
            other => Err(ConfigError::Syntax(
                line,
                format!("expected a word, found {:?}", other),
            )),
        }
    }

    fn expect(&mut self, want: Token) -> Result<(), ConfigError> {
        let line = self.line();
        match self.next().map(|s| &s.token) {
            Some(t) if *t == want => Ok(()),
            other => Err(ConfigError::Syntax(
                line,
                format!("expected {:?}, found {:?}", want, other),
            )),
        }
    }

    /// Collects directive arguments up to and including the semicolon.
    fn args(&mut self) -> Result<Vec<String>, ConfigError> {
        let mut out = Vec::new();
        loop {
            let line = self.line();
            match self.next().map(|s| &s.token) {
                Some(Token::Word(w)) => out.push(w.clone()),
                Some(Token::Semicolon) => {
                    if out.is_empty() {
                        return Err(ConfigError::Syntax(
                            line,
                            "directive without arguments".into(),
                        ));
                    }
                    return Ok(out);
                }
                other => {
                    return Err(ConfigError::Syntax(
                        line,
                        format!("expected argument or `;`, found {:?}", other),
                    ))
                }
            }
        }
    }

    fn one_arg(&mut self) -> Result<String, ConfigError> {
        let line = self.line();
        let mut args = self.args()?;
        if args.len() != 1 {
            return Err(ConfigError::BadValue(
                line,
                format!("expected exactly one argument, got {}", args.len()),
            ));
        }
        Ok(args.remove(0))
    }

    fn size_arg(&mut self) -> Result<u64, ConfigError> {
        let line = self.line();
        let raw = self.one_arg()?;
        parse_size(&raw).ok_or_else(|| {
            ConfigError::BadValue(line, format!("bad size `{}`", raw))
        })
    }

    fn seconds_arg(&mut self) -> Result<Duration, ConfigError> {
        let line = self.line();
        let raw = self.one_arg()?;
        raw.parse::<u64>().map(Duration::from_secs).map_err(|_| {
            ConfigError::BadValue(line, format!("bad duration `{}`", raw))
        })
    }

    fn count_arg(&mut self) -> Result<u64, ConfigError> {
        let line = self.line();
        let raw = self.one_arg()?;
        raw.parse::<u64>().map_err(|_| {
            ConfigError::BadValue(line, format!("bad count `{}`", raw))
        })
    }

    fn parse_top(&mut self) -> Result<Config, ConfigError> {
        let line = self.line();
        let word = self.expect_word()?;
        if word != "http" {
            return Err(ConfigError::Syntax(
                line,
                format!("expected `http` block, found `{}`", word),
            ));
        }
        self.expect(Token::OpenBrace)?;

        let mut servers = Vec::new();
        let mut tunables = Tunables::default();
        let mut global_max_body = None;
        loop {
            let line = self.line();
            match self.peek() {
                Some(Token::CloseBrace) => {
                    self.next();
                    break;
                }
                Some(Token::Word(_)) => {
                    let name = self.expect_word()?;
                    match name {
                        "server" => {
                            self.expect(Token::OpenBrace)?;
                            servers.push(self.parse_server()?);
                        }
                        "client_max_body_size" => {
                            global_max_body = Some(self.size_arg()?);
                        }
                        "client_timeout" => {
                            tunables.client_timeout = self.seconds_arg()?;
                        }
                        "cgi_timeout" => {
                            tunables.cgi_timeout = self.seconds_arg()?;
                        }
                        "max_header_size" => {
                            tunables.max_header_size =
                                self.size_arg()? as usize;
                        }
                        "max_connections" => {
                            tunables.max_connections =
                                self.count_arg()? as usize;
                        }
                        "max_keepalive_requests" => {
                            tunables.max_keepalive_requests =
                                self.count_arg()? as u32;
                        }
                        "session_ttl" => {
                            tunables.session_ttl = self.seconds_arg()?;
                        }
                        "session_cleanup_interval" => {
                            tunables.session_cleanup_interval =
                                self.seconds_arg()?;
                        }
                        other => {
                            return Err(ConfigError::UnknownDirective(
                                line,
                                other.to_string(),
                            ))
                        }
                    }
                }
                other => {
                    return Err(ConfigError::Syntax(
                        line,
                        format!("unexpected {:?} in http block", other),
                    ))
                }
            }
        }

        validate(&mut servers, global_max_body)?;
        Ok(Config { servers, tunables })
    }

    fn parse_server(&mut self) -> Result<ServerConfig, ConfigError> {
        let mut srv = ServerConfig::default();
        loop {
            let line = self.line();
            match self.peek() {
                Some(Token::CloseBrace) => {
                    self.next();
                    return Ok(srv);
                }
                Some(Token::Word(_)) => {
                    let name = self.expect_word()?;
                    match name {
                        "listen" => {
                            for raw in self.args()? {
                                let addr = ListenAddress::parse(&raw)
                                    .ok_or_else(|| {
                                        ConfigError::BadValue(
                                            line,
                                            format!(
                                                "bad listen address `{}`",
                                                raw
                                            ),
                                        )
                                    })?;
                                srv.listen.push(addr);
                            }
                        }
                        "server_name" => {
                            srv.server_names.extend(self.args()?);
                        }
                        "root" => srv.root = self.one_arg()?,
                        "index" => srv.indexes.extend(self.args()?),
                        "client_max_body_size" => {
                            srv.max_body = Some(self.size_arg()?);
                        }
                        "error_page" => {
                            parse_error_page(
                                line,
                                self.args()?,
                                &mut srv.error_pages,
                            )?;
                        }
                        "location" => {
                            let path = self.expect_word()?.to_string();
                            self.expect(Token::OpenBrace)?;
                            srv.locations.push(self.parse_location(path)?);
                        }
                        other => {
                            return Err(ConfigError::UnknownDirective(
                                line,
                                other.to_string(),
                            ))
                        }
                    }
                }
                other => {
                    return Err(ConfigError::Syntax(
                        line,
                        format!("unexpected {:?} in server block", other),
                    ))
                }
            }
        }
    }

    fn parse_location(
        &mut self,
        path: String,
    ) -> Result<LocationConfig, ConfigError> {
        let mut loc = LocationConfig::new(&path);
        loop {
            let line = self.line();
            match self.peek() {
                Some(Token::CloseBrace) => {
                    self.next();
                    return Ok(loc);
                }
                Some(Token::Word(_)) => {
                    let name = self.expect_word()?;
                    match name {
                        "root" => loc.root = self.one_arg()?,
                        "autoindex" => {
                            loc.autoindex = match self.one_arg()?.as_str() {
                                "on" => true,
                                "off" => false,
                                other => {
                                    return Err(ConfigError::BadValue(
                                        line,
                                        format!(
                                            "autoindex must be on/off, \
                                             got `{}`",
                                            other
                                        ),
                                    ))
                                }
                            };
                        }
                        "index" => loc.indexes.extend(self.args()?),
                        "client_max_body_size" => {
                            loc.max_body = Some(self.size_arg()?);
                        }
                        "methods" => {
                            for m in self.args()? {
                                loc.allowed_methods
                                    .push(m.to_ascii_uppercase());
                            }
                        }
                        "return" => {
                            let args = self.args()?;
                            if args.len() != 2 {
                                return Err(ConfigError::BadValue(
                                    line,
                                    "return needs `<code> <target>`".into(),
                                ));
                            }
                            let code =
                                args[0].parse::<u16>().map_err(|_| {
                                    ConfigError::BadValue(
                                        line,
                                        format!(
                                            "bad redirect code `{}`",
                                            args[0]
                                        ),
                                    )
                                })?;
                            loc.redirect = Some(Redirect {
                                code,
                                target: args[1].clone(),
                            });
                        }
                        "cgi_pass" => {
                            let args = self.args()?;
                            if args.len() != 2 {
                                return Err(ConfigError::BadValue(
                                    line,
                                    "cgi_pass needs `<ext> <interpreter>`"
                                        .into(),
                                ));
                            }
                            let ext = if args[0].starts_with('.') {
                                args[0].clone()
                            } else {
                                format!(".{}", args[0])
                            };
                            loc.cgi_pass.insert(ext, args[1].clone());
                        }
                        "upload_dir" => {
                            loc.upload_dir = Some(self.one_arg()?);
                        }
                        "error_page" => {
                            parse_error_page(
                                line,
                                self.args()?,
                                &mut loc.error_pages,
                            )?;
                        }
                        other => {
                            return Err(ConfigError::UnknownDirective(
                                line,
                                other.to_string(),
                            ))
                        }
                    }
                }
                other => {
                    return Err(ConfigError::Syntax(
                        line,
                        format!("unexpected {:?} in location block", other),
                    ))
                }
            }
        }
    }
}

/// `error_page <code>... <path>;` in the nginx style; several codes may
/// share one page.
fn parse_error_page(
    line: usize,
    args: Vec<String>,
    pages: &mut std::collections::HashMap<u16, String>,
) -> Result<(), ConfigError> {
    if args.len() < 2 {
        return Err(ConfigError::BadValue(
            line,
            "error_page needs `<code>... <path>`".into(),
        ));
    }
    let page = args.last().cloned().unwrap_or_default();
    for code in &args[..args.len() - 1] {
        let code = code.parse::<u16>().map_err(|_| {
            ConfigError::BadValue(
                line,
                format!("bad error code `{}`", code),
            )
        })?;
        pages.insert(code, page.clone());
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use matches::assert_matches;

    use super::parse;
    use crate::config::ConfigError;

    const SAMPLE: &str = r#"
        http {
            client_max_body_size 8M;
            cgi_timeout 5;

            server {
                listen 127.0.0.1:8080;
                server_name example.com www.example.com;
                root /var/www/html;
                index index.html index.htm;
                error_page 404 500 /errors/oops.html;

                location / {
                    methods GET POST;
                }
                location /images {
                    autoindex on;
                }
                location /cgi-bin {
                    root /var/www;
                    cgi_pass .py /usr/bin/python3;
                    methods GET POST;
                    client_max_body_size 2M;
                }
                location /old {
                    return 301 /new;
                }
                location /files {
                    upload_dir /var/www/uploads;
                    methods POST PUT DELETE;
                }
            }
        }
    "#;

    #[test]
    fn test_full_sample() {
        let config = parse(SAMPLE).unwrap();
        assert_eq!(config.servers.len(), 1);
        let srv = &config.servers[0];
        assert_eq!(srv.listen[0].port, 8080);
        assert_eq!(srv.server_names.len(), 2);
        assert_eq!(srv.locations.len(), 5);
        assert_eq!(
            srv.error_pages.get(&404).map(|s| s.as_str()),
            Some("/errors/oops.html")
        );
        assert_eq!(config.tunables.cgi_timeout.as_secs(), 5);

        let cgi = &srv.locations[2];
        assert_eq!(cgi.root, "/var/www");
        assert_eq!(cgi.max_body, Some(2 * 1024 * 1024));
        assert!(cgi.has_cgi());

        // Inherited values resolved by validation.
        let root_loc = &srv.locations[0];
        assert_eq!(root_loc.root, "/var/www/html");
        assert_eq!(root_loc.max_body, Some(8 * 1024 * 1024));
        assert_eq!(
            root_loc.indexes,
            vec!["index.html".to_string(), "index.htm".to_string()]
        );

        let redirect = srv.locations[3].redirect.as_ref().unwrap();
        assert_eq!(redirect.code, 301);
        assert_eq!(redirect.target, "/new");
    }

    #[test]
    fn test_unknown_directive() {
        let result = parse("http { server { listen 80; root /; frob x; } }");
        assert_matches!(result, Err(ConfigError::UnknownDirective(..)));
    }

    #[test]
    fn test_missing_semicolon() {
        let result = parse("http { server { listen 80 root /; } }");
        assert!(result.is_err());
    }

    #[test]
    fn test_requires_http_block() {
        assert!(parse("server { listen 80; }").is_err());
    }

    #[test]
    fn test_bad_listen() {
        let result =
            parse("http { server { listen not-a-port; root /; } }");
        assert_matches!(result, Err(ConfigError::BadValue(..)));
    }

    #[test]
    fn test_default_methods_get_only() {
        let config = parse(
            "http { server { listen 80; root /srv; \
             location /x { } } }",
        )
        .unwrap();
        let loc = &config.servers[0].locations[0];
        assert_eq!(loc.allowed_methods, vec!["GET".to_string()]);
    }
}
