//! `#[derive(Object)]`.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{Attribute, Data, DeriveInput, Fields, LitStr, Path, Type, parse_macro_input};

/// Options read from `#[object(...)]` on the struct.
#[derive(Default)]
struct ObjectArgs {
    name: Option<String>,
    prepare: Option<Path>,
}

/// How an absent field is filled.
enum FieldDefault {
    None,
    Trait,
    Factory(Path),
}

/// Options read from `#[object(...)]` on a field.
struct FieldArgs {
    default: FieldDefault,
    rename: Option<String>,
}

fn object_args(attrs: &[Attribute]) -> syn::Result<ObjectArgs> {
    let mut args = ObjectArgs::default();
    for attr in attrs.iter().filter(|attr| attr.path().is_ident("object")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("name") {
                let lit: LitStr = meta.value()?.parse()?;
                args.name = Some(lit.value());
                Ok(())
            } else if meta.path.is_ident("prepare") {
                args.prepare = Some(meta.value()?.parse()?);
                Ok(())
            } else {
                Err(meta.error("unknown object attribute, expected `name` or `prepare`"))
            }
        })?;
    }
    Ok(args)
}

fn field_args(attrs: &[Attribute]) -> syn::Result<FieldArgs> {
    let mut args = FieldArgs {
        default: FieldDefault::None,
        rename: None,
    };
    for attr in attrs.iter().filter(|attr| attr.path().is_ident("object")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("default") {
                args.default = if meta.input.peek(syn::Token![=]) {
                    FieldDefault::Factory(meta.value()?.parse()?)
                } else {
                    FieldDefault::Trait
                };
                Ok(())
            } else if meta.path.is_ident("rename") {
                let lit: LitStr = meta.value()?.parse()?;
                args.rename = Some(lit.value());
                Ok(())
            } else {
                Err(meta.error("unknown field attribute, expected `default` or `rename`"))
            }
        })?;
    }
    Ok(args)
}

/// `RegularHours` -> `regular_hours`.
fn to_snake_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);
    for (idx, ch) in chars.iter().enumerate() {
        if ch.is_uppercase() && idx > 0 {
            let prev = chars[idx - 1];
            let next_lower = chars.get(idx + 1).is_some_and(|next| next.is_lowercase());
            if prev.is_lowercase() || prev.is_ascii_digit() || (prev.is_uppercase() && next_lower) {
                out.push('_');
            }
        }
        out.extend(ch.to_lowercase());
    }
    out
}

/// Implementation of `#[derive(Object)]`.
pub fn derive_object_impl(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand(&input) {
        Ok(expanded) => TokenStream::from(expanded),
        Err(err) => err.to_compile_error().into(),
    }
}

fn expand(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let ident = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(named) => &named.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    ident,
                    "Object can only be derived for structs with named fields",
                ));
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                ident,
                "Object can only be derived for structs",
            ));
        }
    };

    let args = object_args(&input.attrs)?;
    let name = args
        .name
        .unwrap_or_else(|| to_snake_case(&ident.to_string()));
    let prepare = args.prepare.map(|path| {
        quote! {
            fn prepare(
                raw: ::courier::__private::serde_json::Value,
            ) -> ::courier::Result<::courier::__private::serde_json::Value> {
                #path(raw)
            }
        }
    });

    let is_leaf = fields.len() == 1
        && fields
            .first()
            .and_then(|field| field.ident.as_ref())
            .is_some_and(|field| field == "value");

    let shape = if is_leaf {
        let ty = &fields[0].ty;
        quote! {
            ::courier::Shape::Leaf(|raw| {
                ::core::result::Result::Ok(Self {
                    value: <#ty as ::courier::FieldValue>::build(raw, "value")?,
                })
            })
        }
    } else {
        let mut schemas = Vec::with_capacity(fields.len());
        let mut takes = Vec::with_capacity(fields.len());
        for field in fields {
            let field_ident = field
                .ident
                .as_ref()
                .ok_or_else(|| syn::Error::new_spanned(field, "field must be named"))?;
            let field_args = field_args(&field.attrs)?;
            let key = field_args
                .rename
                .unwrap_or_else(|| field_ident.to_string().trim_start_matches("r#").to_owned());
            let ty: &Type = &field.ty;
            schemas.push(match field_args.default {
                FieldDefault::None => quote! {
                    ::courier::FieldSchema::of::<#ty>(#key)
                },
                FieldDefault::Trait => quote! {
                    ::courier::FieldSchema::with_default::<#ty>(
                        #key,
                        <#ty as ::core::default::Default>::default,
                    )
                },
                FieldDefault::Factory(path) => quote! {
                    ::courier::FieldSchema::with_default::<#ty>(#key, #path)
                },
            });
            takes.push(quote! { #field_ident: fields.take(#key)? });
        }
        quote! {
            ::courier::Shape::Composite(::courier::Schema::cached(|| {
                ::courier::Schema::new(
                    ::std::vec![#(#schemas),*],
                    |fields| ::core::result::Result::Ok(Self { #(#takes),* }),
                )
            }))
        }
    };

    Ok(quote! {
        impl #impl_generics ::courier::Object for #ident #ty_generics #where_clause {
            fn name() -> &'static str {
                #name
            }

            #prepare

            fn shape() -> ::courier::Shape<Self> {
                #shape
            }
        }
    })
}
