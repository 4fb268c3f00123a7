extern crate proc_macro;

use proc_macro::{Delimiter, TokenStream, TokenTree};

/// `#[derive(FromConfig)]`: generates a `FromConfig::from_value` impl that
/// reads one struct field per config key, starting from `Self::default()`.
/// Grounded on this crate's predecessor's `derive_yaml::derive_from_yaml`
/// (`derive_yaml/src/lib.rs`) — same raw-`TokenStream`/`TokenTree` walk over
/// the struct body, same string-template code generation — but targets
/// `config_lang::Value`/`FromConfig` instead of its predecessor's
/// `ConfigParser`/`FromYaml`, and maps `snake_case` field names to the
/// `kebab-case` keys the config files actually use.
#[proc_macro_derive(FromConfig)]
pub fn derive_from_config(input: TokenStream) -> TokenStream {
    let struct_name = match extract_struct_name(input.clone()) {
        Some(name) => name,
        None => return quote_error("failed to extract struct name"),
    };

    let fields = match extract_struct_fields(input) {
        Some(f) if !f.is_empty() => f,
        Some(_) => return quote_error("struct has no fields"),
        None => return quote_error("failed to extract struct fields"),
    };

    let assignments = generate_assignments(&fields);
    let code = format_impl_code(&struct_name, &assignments);

    code.parse().unwrap_or_else(|_| quote_error("generated code was invalid"))
}

fn extract_struct_name(input: TokenStream) -> Option<String> {
    let mut tokens = input.into_iter();
    while let Some(token) = tokens.next() {
        if let TokenTree::Ident(ident) = token {
            if ident.to_string() == "struct" {
                if let Some(TokenTree::Ident(name)) = tokens.next() {
                    return Some(name.to_string());
                }
            }
        }
    }
    None
}

fn extract_struct_fields(input: TokenStream) -> Option<Vec<String>> {
    let tokens: Vec<TokenTree> = input.into_iter().collect();
    for token in tokens.iter() {
        if let TokenTree::Group(group) = token {
            if group.delimiter() == Delimiter::Brace {
                let mut fields = Vec::new();
                parse_field_names(group.stream(), &mut fields);
                return Some(fields);
            }
        }
    }
    None
}

fn parse_field_names(group_stream: TokenStream, fields: &mut Vec<String>) {
    let mut group_iter = group_stream.into_iter();
    let mut last_ident = String::new();

    while let Some(inner_token) = group_iter.next() {
        match inner_token {
            TokenTree::Ident(ident) => {
                let s = ident.to_string();
                if s != "pub" {
                    last_ident = s;
                }
            }
            TokenTree::Punct(punct) => {
                if punct.as_char() == ':' {
                    if !last_ident.is_empty() {
                        fields.push(last_ident.clone());
                        last_ident.clear();
                    }
                    skip_to_comma(&mut group_iter);
                }
            }
            _ => {}
        }
    }
}

fn skip_to_comma(iter: &mut impl Iterator<Item = TokenTree>) {
    let mut depth: i32 = 0;
    for token in iter.by_ref() {
        match token {
            TokenTree::Punct(p) if p.as_char() == ',' && depth == 0 => break,
            TokenTree::Group(_) => {
                // nested generics like Vec<Option<T>> come through as a
                // single token tree already, this just guards `<...>` punct
                // sequences some rustc versions emit as separate tokens.
            }
            TokenTree::Punct(p) if p.as_char() == '<' => depth += 1,
            TokenTree::Punct(p) if p.as_char() == '>' => depth -= 1,
            _ => {}
        }
    }
}

fn kebab(field: &str) -> String {
    field.replace('_', "-")
}

fn generate_assignments(fields: &[String]) -> String {
    let mut out = String::new();
    for field in fields {
        out.push_str(&format!(
            "obj.{field} = config_lang::FromConfig::from_value_opt(value.get(\"{key}\"))\
                .map_err(|e| config_lang::ConfigError::Invalid(format!(\"field '{key}': {{e}}\")))?;\n",
            field = field,
            key = kebab(field),
        ));
    }
    out
}

fn format_impl_code(struct_name: &str, assignments: &str) -> String {
    format!(
        r#"impl config_lang::FromConfig for {struct_name} {{
    fn from_value(value: &config_lang::Value) -> Result<Self, config_lang::ConfigError> {{
        let mut obj = Self::default();
        {assignments}
        Ok(obj)
    }}
}}"#,
        struct_name = struct_name,
        assignments = assignments,
    )
}

fn quote_error(msg: &str) -> TokenStream {
    format!("compile_error!(\"FromConfig derive error: {msg}\");")
        .parse()
        .unwrap()
}
