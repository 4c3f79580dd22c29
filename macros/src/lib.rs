use proc_macro::TokenStream;

mod path_impl;

/// Builds a `deepstate::Path` from a string literal checked at compile time.
///
/// The literal must be a non-empty, dot-separated path with no empty segments and
/// none of `__proto__`, `constructor` or `prototype` as a segment.
///
/// # Examples
///
/// ```ignore
/// let path = path!("todos.0.done");
/// store.set_deep(&path, json!(true))?;
/// ```
#[proc_macro]
pub fn path(input: TokenStream) -> TokenStream {
    match path_impl::path(input.into()) {
        Ok(s) => s,
        Err(e) => e.to_compile_error(),
    }
    .into()
}
