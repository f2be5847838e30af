//! Implementation of the Model derive macro.
//!
//! This module turns a struct with `#[dualmodel(...)]` attributes into a
//! `ModelDef` impl that builds the model's `ModelSpec`. Field types map to
//! `TypeRef`s; attribute values that can be checked at expansion time
//! (regex patterns, referential actions, foreign key targets) are.

use proc_macro2::TokenStream;
use quote::{ToTokens, quote};
use syn::meta::ParseNestedMeta;
use syn::spanned::Spanned;
use syn::{
    Attribute, Data, DeriveInput, Error, Expr, Field, Fields, GenericArgument, Ident, Lit,
    LitBool, LitStr, PathArguments, Result, Type,
};

/// Parsed model definition from a struct with `#[derive(Model)]`.
#[derive(Debug)]
pub struct ModelDef {
    /// The struct name, used as the model name.
    pub name: Ident,
    pub generics: syn::Generics,
    /// Whether the model is table-backed.
    pub table: bool,
    /// `ModelConfig` builder calls.
    pub config: Vec<TokenStream>,
    /// Base model whose fields are inherited.
    pub inherit: Option<syn::Path>,
    pub fields: Vec<FieldDef>,
}

/// Parsed declaration of a single field.
#[derive(Debug)]
pub struct FieldDef {
    pub name: Ident,
    /// `TypeRef` expression for the field.
    pub type_ref: TokenStream,
    /// Builder calls on `FieldDecl` or `RelationshipDecl`.
    pub calls: Vec<TokenStream>,
    pub relationship: bool,
}

/// Parse a `DeriveInput` into a `ModelDef`.
pub fn parse_model(input: &DeriveInput) -> Result<ModelDef> {
    let fields = match &input.data {
        Data::Struct(data) => parse_fields(&data.fields)?,
        Data::Enum(_) => {
            return Err(Error::new_spanned(
                input,
                "Model can only be derived for structs, not enums",
            ));
        }
        Data::Union(_) => {
            return Err(Error::new_spanned(
                input,
                "Model can only be derived for structs, not unions",
            ));
        }
    };

    let mut def = ModelDef {
        name: input.ident.clone(),
        generics: input.generics.clone(),
        table: false,
        config: Vec::new(),
        inherit: None,
        fields,
    };
    parse_container_attrs(&input.attrs, &mut def)?;
    Ok(def)
}

fn parse_container_attrs(attrs: &[Attribute], def: &mut ModelDef) -> Result<()> {
    for attr in attrs.iter().filter(|a| a.path().is_ident("dualmodel")) {
        attr.parse_nested_meta(|meta| {
            let path = &meta.path;

            if path.is_ident("table") {
                def.table = parse_flag(&meta)?;
            } else if path.is_ident("table_name") {
                let name = parse_str(&meta)?;
                def.config.push(quote!(.table_name(#name)));
            } else if path.is_ident("extend_existing") {
                let value = parse_flag(&meta)?;
                def.config.push(quote!(.extend_existing(#value)));
            } else if path.is_ident("table_arg") {
                let clause = parse_str(&meta)?;
                def.config.push(quote!(.table_arg(#clause)));
            } else if path.is_ident("populate_by_name") {
                let value = parse_flag(&meta)?;
                def.config.push(quote!(.populate_by_name(#value)));
            } else if path.is_ident("strict") {
                let value = parse_flag(&meta)?;
                def.config.push(quote!(.strict(#value)));
            } else if path.is_ident("description") {
                let text = parse_str(&meta)?;
                def.config.push(quote!(.description(#text)));
            } else if path.is_ident("extra") {
                let lit: LitStr = meta.value()?.parse()?;
                let variant = match lit.value().as_str() {
                    "ignore" => quote!(Ignore),
                    "forbid" => quote!(Forbid),
                    "allow" => quote!(Allow),
                    other => {
                        return Err(Error::new_spanned(
                            &lit,
                            format!("unknown extra behavior `{other}`, expected ignore, forbid or allow"),
                        ));
                    }
                };
                def.config
                    .push(quote!(.extra(::dualmodel::ExtraFieldsBehavior::#variant)));
            } else if path.is_ident("alias_generator") {
                let value = meta.value()?;
                let generator = if value.peek(LitStr) {
                    let lit: LitStr = value.parse()?;
                    match lit.value().as_str() {
                        "camel" | "camelCase" => quote!(::dualmodel::AliasGenerator::CamelCase),
                        "pascal" | "PascalCase" => quote!(::dualmodel::AliasGenerator::PascalCase),
                        "snake" | "snake_case" => quote!(::dualmodel::AliasGenerator::SnakeCase),
                        other => {
                            return Err(Error::new_spanned(
                                &lit,
                                format!("unknown alias generator `{other}`, expected camel, pascal, snake or a function path"),
                            ));
                        }
                    }
                } else {
                    let func: syn::Path = value.parse()?;
                    quote!(::dualmodel::AliasGenerator::Custom(#func))
                };
                def.config.push(quote!(.alias_generator(#generator)));
            } else if path.is_ident("inherit") {
                def.inherit = Some(meta.value()?.parse()?);
            } else {
                let attr_name = path.to_token_stream().to_string();
                return Err(Error::new_spanned(
                    path,
                    format!(
                        "unknown model attribute `{attr_name}`. \
                         Valid attributes are: table, table_name, extend_existing, table_arg, \
                         populate_by_name, strict, description, extra, alias_generator, inherit"
                    ),
                ));
            }
            Ok(())
        })?;
    }
    Ok(())
}

/// Parse all named fields, dropping those marked `skip`.
fn parse_fields(fields: &Fields) -> Result<Vec<FieldDef>> {
    match fields {
        Fields::Named(named) => {
            let mut out = Vec::new();
            for field in &named.named {
                if let Some(def) = parse_field(field)? {
                    out.push(def);
                }
            }
            Ok(out)
        }
        Fields::Unnamed(_) => Err(Error::new_spanned(
            fields,
            "Model requires a struct with named fields",
        )),
        Fields::Unit => Ok(Vec::new()),
    }
}

/// Parse a single field and its `#[dualmodel(...)]` attributes.
fn parse_field(field: &Field) -> Result<Option<FieldDef>> {
    let name = field
        .ident
        .clone()
        .ok_or_else(|| Error::new_spanned(field, "expected named field"))?;

    let mut type_ref = None;
    let mut calls = Vec::new();
    let mut rel_calls = Vec::new();
    let mut relationship = false;
    let mut skip = false;

    for attr in field.attrs.iter().filter(|a| a.path().is_ident("dualmodel")) {
        attr.parse_nested_meta(|meta| {
            let path = &meta.path;

            if path.is_ident("skip") {
                skip = true;
            } else if path.is_ident("relationship") {
                relationship = true;
                if meta.input.peek(syn::token::Paren) {
                    meta.parse_nested_meta(|inner| {
                        rel_calls.push(parse_relationship_option(&inner)?);
                        Ok(())
                    })?;
                }
            } else if path.is_ident("type_ref") {
                let expr: Expr = meta.value()?.parse()?;
                type_ref = Some(expr.into_token_stream());
            } else {
                calls.push(parse_field_option(&meta)?);
            }
            Ok(())
        })?;
    }

    if skip {
        return Ok(None);
    }
    if relationship && !calls.is_empty() {
        return Err(Error::new_spanned(
            field,
            "field options cannot be combined with `relationship`",
        ));
    }

    Ok(Some(FieldDef {
        name,
        type_ref: type_ref.unwrap_or_else(|| type_ref_tokens(&field.ty)),
        calls: if relationship { rel_calls } else { calls },
        relationship,
    }))
}

/// One `FieldDecl` option as a builder call.
fn parse_field_option(meta: &ParseNestedMeta<'_>) -> Result<TokenStream> {
    let path = &meta.path;
    let key = path
        .get_ident()
        .map(ToString::to_string)
        .unwrap_or_default();

    let call = match key.as_str() {
        "primary_key" | "nullable" | "index" | "unique" | "exclude" | "computed" => {
            let method = Ident::new(&key, path.span());
            let value = parse_flag(meta)?;
            quote!(.#method(#value))
        }
        "default" => {
            if meta.input.peek(syn::Token![=]) {
                let expr: Expr = meta.value()?.parse()?;
                quote!(.default(#expr))
            } else {
                quote!(.default(::dualmodel::Value::Null))
            }
        }
        "default_factory" => {
            let func: syn::Path = meta.value()?.parse()?;
            quote!(.default_factory(#func))
        }
        "foreign_key" => {
            let target = parse_str(meta)?;
            let value = target.value();
            match value.split_once('.') {
                Some((table, column)) if !table.is_empty() && !column.is_empty() => {}
                _ => {
                    return Err(Error::new_spanned(
                        &target,
                        format!("foreign key `{value}` must have the form \"table.column\""),
                    ));
                }
            }
            quote!(.foreign_key(#target))
        }
        "ondelete" => {
            let lit = parse_str(meta)?;
            let action = referential_action(&lit)?;
            quote!(.ondelete(::dualmodel::ReferentialAction::#action))
        }
        "sa_type" | "sa_column" => {
            let method = Ident::new(&key, path.span());
            let expr: Expr = meta.value()?.parse()?;
            quote!(.#method(#expr))
        }
        "sa_column_arg" | "alias" | "validation_alias" | "serialization_alias" | "title"
        | "description" => {
            let method = Ident::new(&key, path.span());
            let text = parse_str(meta)?;
            quote!(.#method(#text))
        }
        "gt" | "ge" | "lt" | "le" => {
            let method = Ident::new(&key, path.span());
            let lit: Lit = meta.value()?.parse()?;
            let bound = parse_numeric_lit(&lit)?;
            quote!(.#method(#bound))
        }
        "min_length" | "max_length" => {
            let method = Ident::new(&key, path.span());
            let lit: Lit = meta.value()?.parse()?;
            let len = parse_usize_lit(&lit)?;
            quote!(.#method(#len))
        }
        "max_digits" | "decimal_places" => {
            let method = Ident::new(&key, path.span());
            let lit: Lit = meta.value()?.parse()?;
            let digits = parse_u8_lit(&lit)?;
            quote!(.#method(#digits))
        }
        "pattern" => {
            let lit = parse_str(meta)?;
            // Validate regex at compile time
            if let Err(e) = regex::Regex::new(&lit.value()) {
                return Err(Error::new_spanned(
                    lit,
                    format!("invalid regex pattern: {e}"),
                ));
            }
            quote!(.pattern(#lit))
        }
        "email" => {
            let pattern = r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$";
            quote!(.pattern(#pattern))
        }
        _ => {
            let attr_name = path.to_token_stream().to_string();
            return Err(Error::new_spanned(
                path,
                format!(
                    "unknown field attribute `{attr_name}`. \
                     Valid attributes are: primary_key, nullable, index, unique, exclude, \
                     computed, default, default_factory, foreign_key, ondelete, sa_type, \
                     sa_column, sa_column_arg, alias, validation_alias, serialization_alias, \
                     title, description, gt, ge, lt, le, min_length, max_length, max_digits, \
                     decimal_places, pattern, email, type_ref, relationship, skip"
                ),
            ));
        }
    };
    Ok(call)
}

/// One `RelationshipDecl` option as a builder call.
fn parse_relationship_option(meta: &ParseNestedMeta<'_>) -> Result<TokenStream> {
    let path = &meta.path;
    if path.is_ident("back_populates")
        || path.is_ident("link_model")
        || path.is_ident("mapping_key")
    {
        let method = path.get_ident().cloned();
        let text = parse_str(meta)?;
        return Ok(quote!(.#method(#text)));
    }
    if path.is_ident("cascade_delete") {
        let value = parse_flag(meta)?;
        return Ok(quote!(.cascade_delete(#value)));
    }
    if path.is_ident("passive_deletes") {
        let value = meta.value()?;
        let variant = if value.peek(LitBool) {
            let lit: LitBool = value.parse()?;
            if lit.value { quote!(True) } else { quote!(False) }
        } else {
            let lit: LitStr = value.parse()?;
            if lit.value() != "all" {
                return Err(Error::new_spanned(
                    lit,
                    "passive_deletes expects true, false or \"all\"",
                ));
            }
            quote!(All)
        };
        return Ok(quote!(.passive_deletes(::dualmodel::PassiveDeletes::#variant)));
    }
    let attr_name = path.to_token_stream().to_string();
    Err(Error::new_spanned(
        path,
        format!(
            "unknown relationship attribute `{attr_name}`. \
             Valid attributes are: back_populates, cascade_delete, passive_deletes, \
             link_model, mapping_key"
        ),
    ))
}

/// `ReferentialAction` variant for an `ondelete` string.
fn referential_action(lit: &LitStr) -> Result<Ident> {
    let variant = match lit.value().trim().to_uppercase().replace('_', " ").as_str() {
        "CASCADE" => "Cascade",
        "SET NULL" => "SetNull",
        "SET DEFAULT" => "SetDefault",
        "RESTRICT" => "Restrict",
        "NO ACTION" => "NoAction",
        other => {
            return Err(Error::new_spanned(
                lit,
                format!(
                    "unknown ondelete action `{other}`, expected CASCADE, SET NULL, \
                     SET DEFAULT, RESTRICT or NO ACTION"
                ),
            ));
        }
    };
    Ok(Ident::new(variant, lit.span()))
}

/// A bare flag means `true`; `flag = false` is accepted too.
fn parse_flag(meta: &ParseNestedMeta<'_>) -> Result<bool> {
    if meta.input.peek(syn::Token![=]) {
        let lit: LitBool = meta.value()?.parse()?;
        Ok(lit.value)
    } else {
        Ok(true)
    }
}

fn parse_str(meta: &ParseNestedMeta<'_>) -> Result<LitStr> {
    let value: Lit = meta.value()?.parse()?;
    match value {
        Lit::Str(lit) => Ok(lit),
        other => Err(Error::new_spanned(other, "expected string literal")),
    }
}

/// Parse a numeric literal to f64.
fn parse_numeric_lit(lit: &Lit) -> Result<f64> {
    match lit {
        Lit::Int(int_lit) => int_lit
            .base10_parse::<i64>()
            .map(|v| v as f64)
            .map_err(|e| Error::new_spanned(lit, format!("invalid integer: {e}"))),
        Lit::Float(float_lit) => float_lit
            .base10_parse::<f64>()
            .map_err(|e| Error::new_spanned(lit, format!("invalid float: {e}"))),
        _ => Err(Error::new_spanned(lit, "expected numeric literal")),
    }
}

/// Parse a numeric literal to usize.
fn parse_usize_lit(lit: &Lit) -> Result<usize> {
    match lit {
        Lit::Int(int_lit) => int_lit
            .base10_parse::<usize>()
            .map_err(|e| Error::new_spanned(lit, format!("invalid integer: {e}"))),
        _ => Err(Error::new_spanned(lit, "expected integer literal")),
    }
}

fn parse_u8_lit(lit: &Lit) -> Result<u8> {
    match lit {
        Lit::Int(int_lit) => int_lit
            .base10_parse::<u8>()
            .map_err(|e| Error::new_spanned(lit, format!("invalid integer: {e}"))),
        _ => Err(Error::new_spanned(lit, "expected integer literal")),
    }
}

/// Generic type arguments of the last path segment.
fn type_args(segment: &syn::PathSegment) -> Vec<&Type> {
    match &segment.arguments {
        PathArguments::AngleBracketed(args) => args
            .args
            .iter()
            .filter_map(|arg| match arg {
                GenericArgument::Type(ty) => Some(ty),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn is_u8(ty: &Type) -> bool {
    matches!(ty, Type::Path(p) if p.path.is_ident("u8"))
}

/// `TypeRef` expression for a Rust field type.
///
/// Unknown single-identifier types are taken as references to other models
/// by name.
pub fn type_ref_tokens(ty: &Type) -> TokenStream {
    let opaque = |ty: &Type| {
        let text = ty.to_token_stream().to_string();
        quote!(::dualmodel::TypeRef::Opaque(#text.to_string()))
    };

    match ty {
        Type::Reference(reference) => type_ref_tokens(&reference.elem),
        Type::Paren(inner) => type_ref_tokens(&inner.elem),
        Type::Path(type_path) if type_path.qself.is_none() => {
            let Some(segment) = type_path.path.segments.last() else {
                return opaque(ty);
            };
            let ident = segment.ident.to_string();
            let from_serde_json = type_path
                .path
                .segments
                .first()
                .is_some_and(|s| s.ident == "serde_json");
            let args = type_args(segment);

            match (ident.as_str(), args.as_slice()) {
                ("Option", [inner]) => {
                    let inner = type_ref_tokens(inner);
                    quote!(::dualmodel::TypeRef::optional(#inner))
                }
                ("Vec", [inner]) if is_u8(inner) => quote!(::dualmodel::TypeRef::Bytes),
                ("Vec" | "VecDeque", [inner]) => {
                    let inner = type_ref_tokens(inner);
                    quote!(::dualmodel::TypeRef::list(#inner))
                }
                ("HashSet" | "BTreeSet", [inner]) => {
                    let inner = type_ref_tokens(inner);
                    quote!(::dualmodel::TypeRef::set(#inner))
                }
                ("HashMap" | "BTreeMap", [key, value]) => {
                    let key = type_ref_tokens(key);
                    let value = type_ref_tokens(value);
                    quote!(::dualmodel::TypeRef::map(#key, #value))
                }
                ("Box" | "Arc" | "Rc", [inner]) => type_ref_tokens(inner),
                ("bool", []) => quote!(::dualmodel::TypeRef::Bool),
                (
                    "i8" | "i16" | "i32" | "i64" | "isize" | "u8" | "u16" | "u32" | "u64"
                    | "usize",
                    [],
                ) => quote!(::dualmodel::TypeRef::Int),
                ("f32" | "f64", []) => quote!(::dualmodel::TypeRef::Float),
                ("String" | "str", []) => quote!(::dualmodel::TypeRef::Text),
                ("Decimal", []) => quote!(::dualmodel::TypeRef::Decimal),
                ("NaiveDate", []) => quote!(::dualmodel::TypeRef::Date),
                ("NaiveTime", []) => quote!(::dualmodel::TypeRef::Time),
                ("NaiveDateTime" | "DateTime" | "SystemTime", _) => {
                    quote!(::dualmodel::TypeRef::DateTime)
                }
                ("Uuid", []) => quote!(::dualmodel::TypeRef::Uuid),
                ("Value", []) if from_serde_json => quote!(::dualmodel::TypeRef::Json),
                ("JsonValue", []) => quote!(::dualmodel::TypeRef::Json),
                (name, []) if type_path.path.segments.len() == 1 => {
                    quote!(::dualmodel::TypeRef::named(#name))
                }
                _ => opaque(ty),
            }
        }
        _ => opaque(ty),
    }
}

/// Generate the `ModelDef` trait implementation.
pub fn generate_model_def_impl(def: &ModelDef) -> TokenStream {
    let name = &def.name;
    let name_str = name.to_string();
    let (impl_generics, ty_generics, where_clause) = def.generics.split_for_impl();

    let ctor = if def.table {
        quote!(table)
    } else {
        quote!(plain)
    };
    let config = &def.config;
    let inherit = def.inherit.as_ref().map(|base| {
        quote!(.inherit(&<#base as ::dualmodel::ModelDef>::model_spec()))
    });
    let fields = def.fields.iter().map(|field| {
        let field_name = field.name.to_string();
        let type_ref = &field.type_ref;
        let calls = &field.calls;
        if field.relationship {
            quote! {
                .relationship(#field_name, #type_ref, ::dualmodel::RelationshipDecl::new() #(#calls)*)
            }
        } else {
            quote! {
                .field(#field_name, #type_ref, ::dualmodel::FieldDecl::new() #(#calls)*)
            }
        }
    });

    quote! {
        impl #impl_generics ::dualmodel::ModelDef for #name #ty_generics #where_clause {
            fn model_spec() -> ::dualmodel::ModelSpec {
                ::dualmodel::ModelSpec::#ctor(#name_str)
                    #inherit
                    .config(::dualmodel::ModelConfig::#ctor() #(#config)*)
                    #(#fields)*
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syn::parse_quote;

    fn compact(tokens: &TokenStream) -> String {
        tokens.to_string().replace(' ', "")
    }

    #[test]
    fn test_type_ref_mapping() {
        let ty: Type = parse_quote!(Option<i64>);
        assert_eq!(
            compact(&type_ref_tokens(&ty)),
            "::dualmodel::TypeRef::optional(::dualmodel::TypeRef::Int)"
        );

        let ty: Type = parse_quote!(Vec<u8>);
        assert_eq!(compact(&type_ref_tokens(&ty)), "::dualmodel::TypeRef::Bytes");

        let ty: Type = parse_quote!(Vec<Hero>);
        assert_eq!(
            compact(&type_ref_tokens(&ty)),
            "::dualmodel::TypeRef::list(::dualmodel::TypeRef::named(\"Hero\"))"
        );

        let ty: Type = parse_quote!(BTreeMap<String, f64>);
        assert_eq!(
            compact(&type_ref_tokens(&ty)),
            "::dualmodel::TypeRef::map(::dualmodel::TypeRef::Text,::dualmodel::TypeRef::Float)"
        );

        let ty: Type = parse_quote!(serde_json::Value);
        assert_eq!(compact(&type_ref_tokens(&ty)), "::dualmodel::TypeRef::Json");

        let ty: Type = parse_quote!(std::fs::File);
        assert!(compact(&type_ref_tokens(&ty)).starts_with("::dualmodel::TypeRef::Opaque"));
    }

    #[test]
    fn test_parse_model() {
        let input: DeriveInput = parse_quote! {
            #[dualmodel(table, table_name = "heroes", extra = "forbid")]
            struct Hero {
                #[dualmodel(primary_key, default)]
                id: Option<i64>,
                #[dualmodel(index, max_length = 50)]
                name: String,
                #[dualmodel(foreign_key = "team.id", ondelete = "set null", default)]
                team_id: Option<i64>,
                #[dualmodel(relationship(back_populates = "heroes"))]
                team: Option<Team>,
                #[dualmodel(skip)]
                cache: Vec<u8>,
            }
        };
        let def = parse_model(&input).unwrap();
        assert!(def.table);
        assert_eq!(def.config.len(), 2);
        assert_eq!(def.fields.len(), 4);
        assert!(def.fields[3].relationship);
        assert_eq!(
            compact(&def.fields[2].calls[1]),
            ".ondelete(::dualmodel::ReferentialAction::SetNull)"
        );

        let generated = compact(&generate_model_def_impl(&def));
        assert!(generated.contains("ModelSpec::table(\"Hero\")"));
        assert!(generated.contains("RelationshipDecl::new().back_populates(\"heroes\")"));
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let input: DeriveInput = parse_quote! {
            struct Bad {
                #[dualmodel(pattern = "[unclosed")]
                code: String,
            }
        };
        let err = parse_model(&input).unwrap_err();
        assert!(err.to_string().contains("invalid regex pattern"));
    }

    #[test]
    fn test_relationship_rejects_column_options() {
        let input: DeriveInput = parse_quote! {
            #[dualmodel(table)]
            struct Hero {
                #[dualmodel(relationship, index)]
                team: Option<Team>,
            }
        };
        assert!(parse_model(&input).is_err());
    }

    #[test]
    fn test_bad_foreign_key_and_ondelete() {
        let input: DeriveInput = parse_quote! {
            struct Hero {
                #[dualmodel(foreign_key = "team")]
                team_id: i64,
            }
        };
        assert!(parse_model(&input).is_err());

        let input: DeriveInput = parse_quote! {
            struct Hero {
                #[dualmodel(ondelete = "EXPLODE")]
                team_id: i64,
            }
        };
        let err = parse_model(&input).unwrap_err();
        assert!(err.to_string().contains("unknown ondelete action"));
    }

    #[test]
    fn test_enums_rejected() {
        let input: DeriveInput = parse_quote! {
            enum Nope { A }
        };
        assert!(parse_model(&input).is_err());
    }
}
