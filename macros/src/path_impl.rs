use proc_macro2::TokenStream;
use quote::quote;
use syn::{parse2, LitStr, Result};

macro_rules! regex {
    ($s:expr) => {{
        static RE: ::std::sync::OnceLock<regex::Regex> = ::std::sync::OnceLock::new();
        RE.get_or_init(|| ::regex::Regex::new($s).unwrap())
    }};
}

const FORBIDDEN_SEGMENTS: [&str; 3] = ["__proto__", "constructor", "prototype"];

pub fn path(input: TokenStream) -> Result<TokenStream> {
    let lit: LitStr = parse2(input)?;
    let raw = lit.value();
    if let Err(message) = validate(&raw) {
        return Err(syn::Error::new(lit.span(), message));
    }
    Ok(quote!(::deepstate::__path_from_macro(#lit)))
}

fn validate(raw: &str) -> std::result::Result<(), String> {
    if raw.is_empty() {
        return Err("path is empty".to_string());
    }
    if !regex!(r"^[^.]+(\.[^.]+)*$").is_match(raw) {
        return Err(format!("path `{raw}` contains an empty segment"));
    }
    if let Some(segment) = raw.split('.').find(|s| FORBIDDEN_SEGMENTS.contains(s)) {
        return Err(format!("segment `{segment}` is forbidden"));
    }
    Ok(())
}
