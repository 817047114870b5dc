// plctag-rs
//
// a pure-rust plc tag engine, with rust style APIs and useful extensions.
// Copyright: 2020-2022, Joylei <leingliu@gmail.com>
// License: MIT

use crate::shared::{get_crate, get_fields};
use proc_macro2::TokenStream;
use quote::quote;
use syn::{DeriveInput, Index};

pub fn expand_tag_derive(input: DeriveInput) -> syn::Result<TokenStream> {
    let plctag = get_crate()?;
    let items = get_fields(input.data)?;

    let gets = items
        .iter()
        .map(|info| {
            let field_name = &info.ident;
            let ty = &info.ty;
            let index = Index::from(info.offset as usize);
            quote! {
                res.#field_name = <#ty as #plctag::Decode>::decode(tag, offset + #index)?;
            }
        })
        .collect::<TokenStream>();

    let st_name = input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
    Ok(quote! {
        impl #impl_generics #plctag::Decode for #st_name #ty_generics #where_clause {
            fn decode(tag: &#plctag::RawTag, offset: u32) -> #plctag::Result<Self> {
                let mut res = Self::default();
                #gets
                Ok(res)
            }
        }
    })
}
