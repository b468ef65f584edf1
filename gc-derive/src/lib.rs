//! Derive macro for the `GcTraceable` trait.
//!
//! `#[derive(GcTraceable)]` sums the external memory reported by every field
//! marked `#[gc(track)]`. Structs and enums are supported; for enums only the
//! tracked fields of the active variant are counted.
//!
//! ```ignore
//! use native_bridge_v8::DeriveGcTraceable;
//!
//! #[derive(DeriveGcTraceable)]
//! struct Snapshot {
//!     #[gc(track)]
//!     bytes: Vec<u8>,
//!     // untracked
//!     generation: u64,
//! }
//!
//! #[derive(DeriveGcTraceable)]
//! enum Payload {
//!     Empty,
//!     Buffer(#[gc(track)] Vec<u8>),
//!     Named { #[gc(track)] name: String, id: u32 },
//! }
//! ```
//!
//! Inside `native-bridge-v8` itself, use `#[gc(crate_path = "crate")]`.

use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::{Data, DeriveInput, Fields, parse_macro_input};

/// Derive macro for implementing `GcTraceable`.
///
/// # Attributes
///
/// - `#[gc(track)]` on a field: include it in the total
/// - `#[gc(crate_path = "path")]` on the type: override the crate path
///   (default: `native_bridge_v8`)
#[proc_macro_derive(GcTraceable, attributes(gc))]
pub fn derive_gc_traceable(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
    let crate_path = get_crate_path(&input);

    let body = match &input.data {
        Data::Struct(data) => struct_body(&data.fields, &crate_path),
        Data::Enum(data) => {
            let arms = data.variants.iter().map(|variant| {
                let ident = &variant.ident;
                let (pattern, sum) = variant_arm(&variant.fields, &crate_path);
                quote! { Self::#ident #pattern => #sum }
            });

            quote! {
                match self {
                    #(#arms,)*
                }
            }
        }
        Data::Union(_) => {
            return syn::Error::new_spanned(&input, "GcTraceable cannot be derived for unions")
                .to_compile_error()
                .into();
        }
    };

    let expanded = quote! {
        impl #impl_generics #crate_path::GcTraceable for #name #ty_generics #where_clause {
            fn external_memory_size(&self) -> usize {
                #body
            }
        }
    };

    TokenStream::from(expanded)
}

fn get_crate_path(input: &DeriveInput) -> proc_macro2::TokenStream {
    for attr in &input.attrs {
        if !attr.path().is_ident("gc") {
            continue;
        }

        let mut crate_path = None;

        let _ = attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("crate_path") {
                let value: syn::LitStr = meta.value()?.parse()?;
                let path: syn::Path = value.parse()?;
                crate_path = Some(quote! { #path });
            }
            Ok(())
        });

        if let Some(path) = crate_path {
            return path;
        }
    }

    quote! { native_bridge_v8 }
}

fn struct_body(fields: &Fields, crate_path: &proc_macro2::TokenStream) -> proc_macro2::TokenStream {
    let tracked: Vec<_> = match fields {
        Fields::Named(named) => named
            .named
            .iter()
            .filter(|f| has_gc_track_attr(f))
            .map(|f| {
                let name = &f.ident;
                quote! { #crate_path::GcTraceable::external_memory_size(&self.#name) }
            })
            .collect(),
        Fields::Unnamed(unnamed) => unnamed
            .unnamed
            .iter()
            .enumerate()
            .filter(|(_, f)| has_gc_track_attr(f))
            .map(|(i, _)| {
                let index = syn::Index::from(i);
                quote! { #crate_path::GcTraceable::external_memory_size(&self.#index) }
            })
            .collect(),
        Fields::Unit => vec![],
    };

    sum(&tracked)
}

/// Builds the destructuring pattern and the sum expression for one enum variant.
fn variant_arm(
    fields: &Fields,
    crate_path: &proc_macro2::TokenStream,
) -> (proc_macro2::TokenStream, proc_macro2::TokenStream) {
    match fields {
        Fields::Named(named) => {
            let mut bindings = Vec::new();
            let mut tracked = Vec::new();

            for field in &named.named {
                let name = &field.ident;

                if has_gc_track_attr(field) {
                    bindings.push(quote! { #name });
                    tracked.push(quote! { #crate_path::GcTraceable::external_memory_size(#name) });
                }
            }

            (quote! { { #(#bindings,)* .. } }, sum(&tracked))
        }
        Fields::Unnamed(unnamed) => {
            let mut bindings = Vec::new();
            let mut tracked = Vec::new();

            for (i, field) in unnamed.unnamed.iter().enumerate() {
                if has_gc_track_attr(field) {
                    let binding = format_ident!("__gc_field_{}", i);
                    tracked
                        .push(quote! { #crate_path::GcTraceable::external_memory_size(#binding) });
                    bindings.push(quote! { #binding });
                } else {
                    bindings.push(quote! { _ });
                }
            }

            (quote! { ( #(#bindings),* ) }, sum(&tracked))
        }
        Fields::Unit => (quote! {}, quote! { 0 }),
    }
}

fn sum(tracked: &[proc_macro2::TokenStream]) -> proc_macro2::TokenStream {
    if tracked.is_empty() {
        quote! { 0 }
    } else {
        quote! { 0 #(+ #tracked)* }
    }
}

fn has_gc_track_attr(field: &syn::Field) -> bool {
    field.attrs.iter().any(|attr| {
        if !attr.path().is_ident("gc") {
            return false;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("track") {
                Ok(())
            } else {
                Err(meta.error("expected `track`"))
            }
        })
        .is_ok()
    })
}
