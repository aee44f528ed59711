use quote::quote;
use syn::spanned::Spanned;
use syn::{GenericArgument, PathArguments, ReturnType, Type};

/// How one parameter crosses the broker
#[derive(Debug, Clone)]
pub enum Kind {
    Primitive(char),
    Array(Box<Param>),
    Reference(String),
}

/// A parameter type together with its wire classification
#[derive(Debug, Clone)]
pub struct Param {
    pub ty: Type,
    pub kind: Kind,
}

impl Param {
    /// Compact descriptor text, e.g. `I`, `[J`, `Lchat/Message;`
    pub fn descriptor(&self) -> String {
        match &self.kind {
            Kind::Primitive(marker) => marker.to_string(),
            Kind::Array(element) => format!("[{}", element.descriptor()),
            Kind::Reference(name) => format!("L{name};"),
        }
    }
}

fn primitive_marker(ident: &str) -> Option<char> {
    Some(match ident {
        "i8" => 'B',
        "char" => 'C',
        "f64" => 'D',
        "f32" => 'F',
        "i32" => 'I',
        "i64" => 'J',
        "i16" => 'S',
        "bool" => 'Z',
        _ => return None,
    })
}

pub fn classify(ty: &Type) -> syn::Result<Param> {
    match ty {
        Type::Paren(inner) => classify(&inner.elem),
        Type::Group(inner) => classify(&inner.elem),
        Type::Reference(_) => Err(syn::Error::new(
            ty.span(),
            "remote operation parameters must be owned, borrowed values cannot be sent",
        )),
        Type::Path(path) if path.qself.is_none() => {
            let segments = &path.path.segments;
            let Some(last) = segments.last() else {
                return Err(syn::Error::new(ty.span(), "empty type path"));
            };

            if segments.len() == 1 && last.arguments.is_none() {
                if let Some(marker) = primitive_marker(&last.ident.to_string()) {
                    return Ok(Param {
                        ty: ty.clone(),
                        kind: Kind::Primitive(marker),
                    });
                }
            }

            if last.ident == "Vec" {
                if let Some(element) = single_type_argument(&last.arguments) {
                    return Ok(Param {
                        ty: ty.clone(),
                        kind: Kind::Array(Box::new(classify(element)?)),
                    });
                }
            }

            Ok(Param {
                ty: ty.clone(),
                kind: Kind::Reference(path_name(&path.path)),
            })
        }
        _ => Err(syn::Error::new(
            ty.span(),
            "unsupported remote parameter type, use a primitive, a Vec or a named serde type",
        )),
    }
}

/// Reference name with `/` between segments and generic arguments kept, e.g.
/// `std/collections/HashMap<String,Vec<u8>>`
fn path_name(path: &syn::Path) -> String {
    path.segments
        .iter()
        .map(|segment| {
            let ident = segment.ident.to_string();
            match &segment.arguments {
                PathArguments::None => ident,
                PathArguments::AngleBracketed(arguments) => {
                    let arguments: Vec<_> = arguments
                        .args
                        .iter()
                        .map(|argument| match argument {
                            GenericArgument::Type(ty) => type_name(ty),
                            other => token_text(quote!(#other)),
                        })
                        .collect();
                    format!("{ident}<{}>", arguments.join(","))
                }
                PathArguments::Parenthesized(arguments) => {
                    format!("{ident}{}", token_text(quote!(#arguments)))
                }
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn type_name(ty: &Type) -> String {
    match ty {
        Type::Path(path) if path.qself.is_none() => path_name(&path.path),
        other => token_text(quote!(#other)),
    }
}

// `;` ends a reference in the compact encoding
fn token_text(tokens: proc_macro2::TokenStream) -> String {
    tokens.to_string().replace([' ', ';'], "")
}

fn single_type_argument(arguments: &PathArguments) -> Option<&Type> {
    let PathArguments::AngleBracketed(arguments) = arguments else {
        return None;
    };
    let mut args = arguments.args.iter();
    match (args.next(), args.next()) {
        (Some(GenericArgument::Type(ty)), None) => Some(ty),
        _ => None,
    }
}

/// Return marker: `V` for `()` or no return type, otherwise the value's descriptor
pub fn return_descriptor(output: &ReturnType) -> Option<String> {
    match output {
        ReturnType::Default => None,
        ReturnType::Type(_, ty) => match &**ty {
            Type::Tuple(tuple) if tuple.elems.is_empty() => None,
            // results are never sent, so any type is fine here
            other => Some(match classify(other) {
                Ok(param) => param.descriptor(),
                Err(_) => format!("L{};", type_name(other)),
            }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syn::parse_quote;

    fn descriptor(ty: Type) -> String {
        classify(&ty).unwrap().descriptor()
    }

    #[test]
    fn test_primitives_and_arrays() {
        assert_eq!(descriptor(parse_quote!(i32)), "I");
        assert_eq!(descriptor(parse_quote!(bool)), "Z");
        assert_eq!(descriptor(parse_quote!(Vec<i64>)), "[J");
        assert_eq!(descriptor(parse_quote!(Vec<Vec<String>>)), "[[LString;");
    }

    #[test]
    fn test_paths_become_references() {
        assert_eq!(descriptor(parse_quote!(java::lang::String)), "Ljava/lang/String;");
        assert_eq!(descriptor(parse_quote!(::std::string::String)), "Lstd/string/String;");
    }

    #[test]
    fn test_generic_arguments_are_part_of_the_name() {
        assert_eq!(
            descriptor(parse_quote!(std::collections::HashMap<String, i32>)),
            "Lstd/collections/HashMap<String,i32>;"
        );
        assert_eq!(descriptor(parse_quote!(Option<Vec<a::Foo>>)), "LOption<Vec<a/Foo>>;");
        assert_ne!(
            descriptor(parse_quote!(Option<Vec<Foo>>)),
            descriptor(parse_quote!(Option<Vec<Bar>>))
        );
    }

    #[test]
    fn test_borrowed_parameters_are_rejected() {
        assert!(classify(&parse_quote!(&str)).is_err());
        assert!(classify(&parse_quote!((i32, i32))).is_err());
    }

    #[test]
    fn test_return_descriptor() {
        assert_eq!(return_descriptor(&parse_quote!()), None);
        assert_eq!(return_descriptor(&parse_quote!(-> ())), None);
        assert_eq!(return_descriptor(&parse_quote!(-> i64)).as_deref(), Some("J"));
    }
}
