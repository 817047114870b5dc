// plctag-rs
//
// a pure-rust plc tag engine, with rust style APIs and useful extensions.
// Copyright: 2020-2022, Joylei <leingliu@gmail.com>
// License: MIT

use proc_macro2::Span;
use proc_macro_crate::{crate_name, FoundCrate};
use syn::{
    Attribute, Data, DataStruct, Fields, Ident, Lit, Meta, MetaNameValue, NestedMeta, Type,
};

/// resolve the path callers use for the core crate: `plctag` facade,
/// `plctag-core` directly, or `crate` inside the workspace
pub fn get_crate() -> syn::Result<Ident> {
    let plctag = match crate_name("plctag").or_else(|_| crate_name("plctag-core")) {
        Ok(found) => match found {
            FoundCrate::Itself => Ident::new("crate", Span::call_site()),
            FoundCrate::Name(name) => Ident::new(&name.replace('-', "_"), Span::call_site()),
        },
        Err(_) => Ident::new("plctag_core", Span::call_site()),
    };
    Ok(plctag)
}

pub struct FieldInfo {
    pub ident: Ident,
    pub ty: Type,
    pub offset: u32,
}

/// collect `#[tag(offset = N)]` fields of a named struct
pub fn get_fields(data: Data) -> syn::Result<Vec<FieldInfo>> {
    let fields = match data {
        Data::Struct(DataStruct {
            fields: Fields::Named(fields),
            ..
        }) => fields.named,
        _ => {
            return Err(syn::Error::new(
                Span::call_site(),
                "this derive macro only works on structs with named fields",
            ))
        }
    };
    let mut items = Vec::new();
    for field in fields {
        let attrs: Vec<&Attribute> = field
            .attrs
            .iter()
            .filter(|attr| attr.path.is_ident("tag"))
            .collect();
        let offset = match attrs.len() {
            0 => continue,
            1 => get_offset_attr(attrs[0])?,
            _ => {
                let mut error = syn::Error::new_spanned(attrs[1], "redundant `tag()` attribute");
                error.combine(syn::Error::new_spanned(attrs[0], "note: first one here"));
                return Err(error);
            }
        };
        items.push(FieldInfo {
            ident: field.ident.unwrap(),
            ty: field.ty,
            offset,
        });
    }
    if items.is_empty() {
        return Err(syn::Error::new(
            Span::call_site(),
            "this derive macro requires at least one #[tag(offset = N)] attribute",
        ));
    }
    Ok(items)
}

fn get_offset_attr(attr: &Attribute) -> syn::Result<u32> {
    let meta = attr.parse_meta()?;
    let meta_list = match meta {
        Meta::List(list) => list,
        _ => {
            return Err(syn::Error::new_spanned(
                meta,
                "bad usage, expected #[tag(offset = N)]",
            ))
        }
    };
    let nested = match meta_list.nested.len() {
        1 => &meta_list.nested[0],
        _ => {
            return Err(syn::Error::new_spanned(
                meta_list.nested,
                "currently only a single offset attribute is supported",
            ));
        }
    };
    match nested {
        NestedMeta::Meta(Meta::NameValue(MetaNameValue { path, lit, .. }))
            if path.is_ident("offset") =>
        {
            match lit {
                Lit::Int(value) => value.base10_parse(),
                lit => Err(syn::Error::new_spanned(lit, "expected int literal")),
            }
        }
        _ => Err(syn::Error::new_spanned(
            nested,
            "bad usage, expected #[tag(offset = N)]",
        )),
    }
}
