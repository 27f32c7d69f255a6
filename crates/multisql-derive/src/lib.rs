//! Derive macros for multisql entities.
//!
//! `#[derive(Entity)]` emits the static column table read by the schema
//! introspector, plus value extraction and assignment by column name.
//! `#[derive(SqlEnum)]` maps fieldless enums to their integer discriminant.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{
    parse_macro_input, Attribute, Data, DeriveInput, Expr, Fields, GenericArgument, Ident, Lit,
    Meta, PathArguments, Type,
};

/// Derives `multisql_core::entity::Entity` for a struct with named fields.
///
/// # Attributes
///
/// - `#[table(name = "Cliente")]` - table name (defaults to the snake_case
///   struct name)
/// - `#[table(index(name = "IX_Cliente_Nome", columns = "Nome, Email", unique, filter = "..."))]`
///   - declared index, repeatable
/// - `#[table(indexes)]` - the type owns its `IX_<table>_*` indexes even
///   with none declared, so the reconciler drops the stale ones
///
/// # Field Attributes
///
/// - `#[column(name = "Nome")]` - column name (defaults to the field name)
/// - `#[column(key)]`, `#[column(auto_increment)]`, `#[column(ignore)]`
/// - `#[column(only_insert)]`, `#[column(only_update)]`
/// - `#[column(auto_insert_date)]`, `#[column(auto_update_date)]`
/// - `#[column(insert_user)]`, `#[column(update_user)]`, `#[column(origin)]`
/// - `#[column(search)]` - description column for free text search
/// - `#[column(enumeration)]` - the field type derives `SqlEnum`
/// - `#[column(money)]` - fixed precision amount
/// - `#[column(kind = "guid")]` - explicit semantic type
/// - `#[column(size = "100")]`, `#[column(default = "0")]`
///
/// Persisted field types must implement `ToSqlValue`, `FromSqlValue` and
/// `Clone`; the struct must implement `Default`.
#[proc_macro_derive(Entity, attributes(table, column))]
pub fn derive_entity(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    derive_entity_impl(input)
        .unwrap_or_else(|e| e.to_compile_error())
        .into()
}

/// Derives `multisql_core::entity::SqlEnum`, `ToSqlValue` and
/// `FromSqlValue` for a fieldless enum.
#[proc_macro_derive(SqlEnum)]
pub fn derive_sql_enum(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    derive_sql_enum_impl(input)
        .unwrap_or_else(|e| e.to_compile_error())
        .into()
}

#[derive(Default)]
#[allow(clippy::struct_excessive_bools)]
struct ColumnAttrs {
    name: Option<String>,
    key: bool,
    auto_increment: bool,
    ignore: bool,
    only_insert: bool,
    only_update: bool,
    auto_insert_date: bool,
    auto_update_date: bool,
    insert_user: bool,
    update_user: bool,
    origin: bool,
    search: bool,
    enumeration: bool,
    money: bool,
    kind: Option<String>,
    size: Option<String>,
    default: Option<String>,
}

struct IndexAttrs {
    name: String,
    columns: Vec<String>,
    unique: bool,
    filter: Option<String>,
}

struct TableAttrs {
    name: Option<String>,
    indexes: Vec<IndexAttrs>,
    manages_indexes: bool,
}

fn string_value(meta: &syn::meta::ParseNestedMeta<'_>) -> syn::Result<String> {
    let value: Expr = meta.value()?.parse()?;
    if let Expr::Lit(lit) = &value {
        if let Lit::Str(s) = &lit.lit {
            return Ok(s.value());
        }
    }
    Err(syn::Error::new_spanned(value, "expected a string literal"))
}

fn parse_table_attrs(attrs: &[Attribute]) -> syn::Result<TableAttrs> {
    let mut result = TableAttrs {
        name: None,
        indexes: Vec::new(),
        manages_indexes: false,
    };

    for attr in attrs.iter().filter(|a| a.path().is_ident("table")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("name") {
                result.name = Some(string_value(&meta)?);
            } else if meta.path.is_ident("indexes") {
                result.manages_indexes = true;
            } else if meta.path.is_ident("index") {
                let mut name = None;
                let mut columns = Vec::new();
                let mut unique = false;
                let mut filter = None;
                meta.parse_nested_meta(|inner| {
                    if inner.path.is_ident("name") {
                        name = Some(string_value(&inner)?);
                    } else if inner.path.is_ident("columns") {
                        columns = string_value(&inner)?
                            .split(',')
                            .map(|c| c.trim().to_string())
                            .filter(|c| !c.is_empty())
                            .collect();
                    } else if inner.path.is_ident("unique") {
                        unique = true;
                    } else if inner.path.is_ident("filter") {
                        filter = Some(string_value(&inner)?);
                    } else {
                        return Err(inner.error("unknown index attribute"));
                    }
                    Ok(())
                })?;
                let name = name.ok_or_else(|| meta.error("index requires a name"))?;
                if columns.is_empty() {
                    return Err(meta.error("index requires at least one column"));
                }
                result.indexes.push(IndexAttrs {
                    name,
                    columns,
                    unique,
                    filter,
                });
            } else {
                return Err(meta.error("unknown table attribute"));
            }
            Ok(())
        })?;
    }

    Ok(result)
}

fn parse_column_attrs(attrs: &[Attribute]) -> syn::Result<ColumnAttrs> {
    let mut result = ColumnAttrs::default();

    for attr in attrs.iter().filter(|a| a.path().is_ident("column")) {
        // Handle empty attribute like #[column]
        if matches!(attr.meta, Meta::Path(_)) {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            let path = &meta.path;
            if path.is_ident("name") {
                result.name = Some(string_value(&meta)?);
            } else if path.is_ident("kind") {
                result.kind = Some(string_value(&meta)?);
            } else if path.is_ident("size") {
                result.size = Some(string_value(&meta)?);
            } else if path.is_ident("default") {
                result.default = Some(string_value(&meta)?);
            } else if path.is_ident("key") || path.is_ident("primary_key") {
                result.key = true;
            } else if path.is_ident("auto_increment") || path.is_ident("autoincrement") {
                result.auto_increment = true;
            } else if path.is_ident("ignore") {
                result.ignore = true;
            } else if path.is_ident("only_insert") {
                result.only_insert = true;
            } else if path.is_ident("only_update") {
                result.only_update = true;
            } else if path.is_ident("auto_insert_date") {
                result.auto_insert_date = true;
            } else if path.is_ident("auto_update_date") {
                result.auto_update_date = true;
            } else if path.is_ident("insert_user") {
                result.insert_user = true;
            } else if path.is_ident("update_user") {
                result.update_user = true;
            } else if path.is_ident("origin") {
                result.origin = true;
            } else if path.is_ident("search") {
                result.search = true;
            } else if path.is_ident("enumeration") {
                result.enumeration = true;
            } else if path.is_ident("money") {
                result.money = true;
            } else {
                return Err(meta.error("unknown column attribute"));
            }
            Ok(())
        })?;
    }

    Ok(result)
}

/// Last path segment of a type and its first generic argument, if any.
fn type_head(ty: &Type) -> Option<(String, Option<&Type>)> {
    let Type::Path(path) = ty else {
        return None;
    };
    let segment = path.path.segments.last()?;
    let inner = match &segment.arguments {
        PathArguments::AngleBracketed(args) => args.args.iter().find_map(|arg| match arg {
            GenericArgument::Type(inner) => Some(inner),
            _ => None,
        }),
        _ => None,
    };
    Some((segment.ident.to_string(), inner))
}

/// Infers `(column type, field shape)` token paths for a field.
fn infer_column(ty: &Type, attrs: &ColumnAttrs) -> syn::Result<(TokenStream2, TokenStream2)> {
    let (head, inner) = type_head(ty).unwrap_or_default();
    let (base_ty, optional) = match (head.as_str(), inner) {
        ("Option", Some(inner)) => (inner, true),
        _ => (ty, false),
    };
    let (base, base_inner) = type_head(base_ty).unwrap_or_default();

    let kind = if let Some(kind) = &attrs.kind {
        Some(kind.to_ascii_lowercase())
    } else if attrs.enumeration {
        Some(String::from("enum"))
    } else if attrs.money {
        Some(String::from("money"))
    } else {
        match base.as_str() {
            "bool" => Some("bool"),
            "i8" | "i16" | "i32" | "i64" | "u8" | "u16" | "u32" => Some("int"),
            "f32" | "f64" => Some("double"),
            "String" => Some("string"),
            "NaiveDateTime" => Some("date"),
            "NaiveTime" => Some("time"),
            "Uuid" => Some("guid"),
            "Vec" if base_inner.and_then(type_head).is_some_and(|(h, _)| h == "u8") => Some("blob"),
            _ => None,
        }
        .map(String::from)
    };

    let sequence = matches!(kind.as_deref(), Some("string" | "blob"));
    let column_type = match kind.as_deref() {
        Some("bool") => quote!(Bool),
        Some("int") => quote!(Int),
        Some("double") => quote!(Double),
        Some("money") => quote!(Money),
        Some("enum") => quote!(Enum),
        Some("guid") => quote!(Guid),
        Some("date") => quote!(Date),
        Some("time") => quote!(Time),
        Some("string") => quote!(String),
        Some("blob") => quote!(Blob),
        Some(other) => {
            return Err(syn::Error::new_spanned(
                ty,
                format!("unknown column kind `{other}`"),
            ));
        }
        None if attrs.ignore => quote!(String),
        None => {
            return Err(syn::Error::new_spanned(
                ty,
                "cannot infer the column type; add #[column(kind = \"...\")] or #[column(ignore)]",
            ));
        }
    };

    let shape = if optional {
        quote!(Optional)
    } else if kind.is_none() {
        quote!(Reference)
    } else if sequence {
        quote!(Sequence)
    } else if attrs.enumeration {
        quote!(Enumeration)
    } else {
        quote!(Plain)
    };

    Ok((column_type, shape))
}

fn option_tokens(value: Option<&String>) -> TokenStream2 {
    match value {
        Some(v) => quote!(::std::option::Option::Some(#v)),
        None => quote!(::std::option::Option::None),
    }
}

fn derive_entity_impl(input: DeriveInput) -> syn::Result<TokenStream2> {
    let struct_name = &input.ident;
    let table = parse_table_attrs(&input.attrs)?;
    let table_name = table
        .name
        .unwrap_or_else(|| to_snake_case(&struct_name.to_string()));

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    &input,
                    "Entity derive only supports structs with named fields",
                ));
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                &input,
                "Entity derive only supports structs",
            ));
        }
    };

    let mut defs = Vec::new();
    let mut values = Vec::new();
    let mut assigns = Vec::new();

    for field in fields {
        let field_name = field
            .ident
            .as_ref()
            .ok_or_else(|| syn::Error::new_spanned(field, "expected a named field"))?;
        let attrs = parse_column_attrs(&field.attrs)?;
        let column_name = attrs.name.clone().unwrap_or_else(|| field_name.to_string());
        let field_str = field_name.to_string();
        let (column_type, shape) = infer_column(&field.ty, &attrs)?;

        let role = if attrs.insert_user {
            quote!(InsertUser)
        } else if attrs.update_user {
            quote!(UpdateUser)
        } else if attrs.origin {
            quote!(Origin)
        } else {
            quote!(Data)
        };
        let size = option_tokens(attrs.size.as_ref());
        let default = option_tokens(attrs.default.as_ref());
        let ColumnAttrs {
            key,
            auto_increment,
            ignore,
            only_insert,
            only_update,
            auto_insert_date,
            auto_update_date,
            search,
            ..
        } = attrs;

        defs.push(quote! {
            ::multisql_core::schema::ColumnDef {
                field: #field_str,
                name: #column_name,
                column_type: ::multisql_core::schema::ColumnType::#column_type,
                shape: ::multisql_core::schema::FieldShape::#shape,
                flags: ::multisql_core::schema::ColumnFlags {
                    key: #key,
                    auto_increment: #auto_increment,
                    ignored: #ignore,
                    only_insert: #only_insert,
                    only_update: #only_update,
                    auto_insert_date: #auto_insert_date,
                    auto_update_date: #auto_update_date,
                    search: #search,
                },
                role: ::multisql_core::schema::ColumnRole::#role,
                size: #size,
                default: #default,
            }
        });

        if ignore {
            values.push(quote!(::multisql_core::value::SqlValue::Null));
            continue;
        }

        values.push(quote! {
            ::multisql_core::value::ToSqlValue::to_sql_value(
                ::std::clone::Clone::clone(&self.#field_name)
            )
        });
        assigns.push(quote! {
            if column.eq_ignore_ascii_case(#column_name) {
                self.#field_name = ::multisql_core::value::FromSqlValue::from_sql_value(value)
                    .map_err(|detail| ::multisql_core::error::CoreError::Conversion {
                        column: ::std::string::ToString::to_string(column),
                        detail,
                    })?;
                return ::std::result::Result::Ok(true);
            }
        });
    }

    let indexes = if table.indexes.is_empty() {
        quote!()
    } else {
        let entries = table.indexes.iter().map(|index| {
            let name = &index.name;
            let columns = &index.columns;
            let unique = index.unique;
            let filter = match &index.filter {
                Some(f) => quote!(::std::option::Option::Some(::std::string::ToString::to_string(#f))),
                None => quote!(::std::option::Option::None),
            };
            quote! {
                ::multisql_core::schema::IndexDescriptor {
                    name: ::std::string::ToString::to_string(#name),
                    columns: ::std::vec![#(::std::string::ToString::to_string(#columns)),*],
                    unique: #unique,
                    filter: #filter,
                }
            }
        });
        quote! {
            fn indexes() -> ::std::vec::Vec<::multisql_core::schema::IndexDescriptor> {
                ::std::vec![#(#entries),*]
            }
        }
    };

    let manages_indexes = if table.manages_indexes {
        quote!(const MANAGES_INDEXES: bool = true;)
    } else {
        quote!()
    };

    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    Ok(quote! {
        impl #impl_generics ::multisql_core::entity::Entity for #struct_name #ty_generics #where_clause {
            const TABLE: &'static str = #table_name;
            #manages_indexes

            fn columns() -> &'static [::multisql_core::schema::ColumnDef] {
                const COLUMNS: &[::multisql_core::schema::ColumnDef] = &[#(#defs),*];
                COLUMNS
            }

            fn values(&self) -> ::std::vec::Vec<::multisql_core::value::SqlValue> {
                ::std::vec![#(#values),*]
            }

            #[allow(unused_variables)]
            fn assign(
                &mut self,
                column: &str,
                value: ::multisql_core::value::SqlValue,
            ) -> ::multisql_core::error::Result<bool> {
                #(#assigns)*
                ::std::result::Result::Ok(false)
            }

            #indexes
        }
    })
}

fn derive_sql_enum_impl(input: DeriveInput) -> syn::Result<TokenStream2> {
    let enum_name = &input.ident;
    let Data::Enum(data) = &input.data else {
        return Err(syn::Error::new_spanned(
            &input,
            "SqlEnum derive only supports enums",
        ));
    };

    let mut variants: Vec<(&Ident, TokenStream2)> = Vec::new();
    let mut base: TokenStream2 = quote!(0_i64);
    let mut offset: i64 = 0;
    for variant in &data.variants {
        if !matches!(variant.fields, Fields::Unit) {
            return Err(syn::Error::new_spanned(
                variant,
                "SqlEnum variants cannot carry fields",
            ));
        }
        if let Some((_, expr)) = &variant.discriminant {
            base = quote!((#expr) as i64);
            offset = 0;
        }
        variants.push((&variant.ident, quote!(#base + #offset)));
        offset += 1;
    }

    let to_arms = variants
        .iter()
        .map(|(ident, value)| quote!(Self::#ident => #value));
    let from_checks = variants.iter().map(|(ident, value)| {
        quote! {
            if value == #value {
                return ::std::option::Option::Some(Self::#ident);
            }
        }
    });
    let type_name = enum_name.to_string();

    Ok(quote! {
        impl ::multisql_core::entity::SqlEnum for #enum_name {
            #[allow(clippy::cast_lossless, clippy::cast_possible_wrap)]
            fn discriminant(&self) -> i64 {
                match self {
                    #(#to_arms),*
                }
            }

            #[allow(clippy::cast_lossless, clippy::cast_possible_wrap)]
            fn from_discriminant(value: i64) -> ::std::option::Option<Self> {
                #(#from_checks)*
                ::std::option::Option::None
            }
        }

        impl ::multisql_core::value::ToSqlValue for #enum_name {
            fn to_sql_value(self) -> ::multisql_core::value::SqlValue {
                ::multisql_core::value::SqlValue::Int(
                    ::multisql_core::entity::SqlEnum::discriminant(&self),
                )
            }
        }

        impl ::multisql_core::value::FromSqlValue for #enum_name {
            fn from_sql_value(
                value: ::multisql_core::value::SqlValue,
            ) -> ::std::result::Result<Self, ::std::string::String> {
                let number = value
                    .as_i64()
                    .ok_or_else(|| ::std::format!("expected {} discriminant, found {:?}", #type_name, value))?;
                <Self as ::multisql_core::entity::SqlEnum>::from_discriminant(number)
                    .ok_or_else(|| ::std::format!("{} is not a valid {}", number, #type_name))
            }
        }
    })
}

fn to_snake_case(s: &str) -> String {
    let mut result = String::new();
    for (i, c) in s.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                result.push('_');
            }
            result.push(c.to_ascii_lowercase());
        } else {
            result.push(c);
        }
    }
    result
}
