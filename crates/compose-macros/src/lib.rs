use proc_macro::TokenStream;
use proc_macro2::{Span, TokenStream as TokenStream2};
use quote::quote;
use syn::{parse_macro_input, FnArg, Ident, ItemFn, Pat, PatType, ReturnType, Type};

fn is_fn_trait(bound: &syn::TypeParamBound) -> bool {
    if let syn::TypeParamBound::Trait(trait_bound) = bound {
        if let Some(segment) = trait_bound.path.segments.last() {
            let ident_str = segment.ident.to_string();
            return ident_str == "FnMut" || ident_str == "Fn" || ident_str == "FnOnce";
        }
    }
    false
}

/// Check if a type is Fn-like (impl FnMut/Fn/FnOnce, Box<dyn FnMut>, bare fn pointers).
fn is_fn_like_type(ty: &Type) -> bool {
    match ty {
        Type::ImplTrait(impl_trait) => impl_trait.bounds.iter().any(is_fn_trait),
        // Box<dyn FnMut(...)>, Rc<dyn Fn(...)>
        Type::Path(type_path) => {
            let Some(segment) = type_path.path.segments.last() else {
                return false;
            };
            if segment.ident != "Box" && segment.ident != "Rc" {
                return false;
            }
            if let syn::PathArguments::AngleBracketed(args) = &segment.arguments {
                if let Some(syn::GenericArgument::Type(Type::TraitObject(trait_obj))) =
                    args.args.first()
                {
                    return trait_obj.bounds.iter().any(is_fn_trait);
                }
            }
            false
        }
        Type::BareFn(_) => true,
        _ => false,
    }
}

/// Check if a generic type parameter has Fn-like bounds, inline or in the where clause.
fn is_generic_fn_like(ty: &Type, generics: &syn::Generics) -> bool {
    let type_ident = match ty {
        Type::Path(type_path) if type_path.path.segments.len() == 1 => {
            &type_path.path.segments[0].ident
        }
        _ => return false,
    };

    for param in &generics.params {
        if let syn::GenericParam::Type(type_param) = param {
            if type_param.ident == *type_ident && type_param.bounds.iter().any(is_fn_trait) {
                return true;
            }
        }
    }

    if let Some(where_clause) = &generics.where_clause {
        for predicate in &where_clause.predicates {
            if let syn::WherePredicate::Type(pred) = predicate {
                if let Type::Path(bounded_type) = &pred.bounded_ty {
                    if bounded_type.path.segments.len() == 1
                        && bounded_type.path.segments[0].ident == *type_ident
                        && pred.bounds.iter().any(is_fn_trait)
                    {
                        return true;
                    }
                }
            }
        }
    }

    false
}

/// Unified check: is this type Fn-like, either syntactically or via generic bounds?
fn is_fn_param(ty: &Type, generics: &syn::Generics) -> bool {
    is_fn_like_type(ty) || is_generic_fn_like(ty, generics)
}

/// Whether a parameter can be compared with its previous value and captured
/// by the restart closure.
fn is_restartable_param(ty: &Type, generics: &syn::Generics) -> bool {
    !matches!(ty, Type::ImplTrait(_) | Type::Reference(_)) && !is_fn_param(ty, generics)
}

/// Turns a function into a composable.
///
/// Each call runs inside its own group keyed by the function's definition
/// site. Unit-returning, non-generic functions whose parameters are owned,
/// `Clone + PartialEq` values become restartable: the body is skipped when
/// every parameter equals the previous pass and nothing it read changed, and
/// it can be re-run on its own when state it read is written.
///
/// `#[composable(no_skip)]` always runs the body.
#[proc_macro_attribute]
pub fn composable(attr: TokenStream, item: TokenStream) -> TokenStream {
    let attr_tokens = TokenStream2::from(attr);
    let mut enable_skip = true;
    if !attr_tokens.is_empty() {
        match syn::parse2::<Ident>(attr_tokens) {
            Ok(ident) if ident == "no_skip" => enable_skip = false,
            Ok(other) => {
                return syn::Error::new_spanned(other, "unsupported composable attribute")
                    .to_compile_error()
                    .into();
            }
            Err(err) => {
                return err.to_compile_error().into();
            }
        }
    }

    let mut func = parse_macro_input!(item as ItemFn);
    let mut param_info = Vec::new();

    for (index, arg) in func.sig.inputs.iter_mut().enumerate() {
        match arg {
            FnArg::Typed(PatType { pat, ty, .. }) => {
                if matches!(**ty, Type::ImplTrait(_)) {
                    // impl Trait params cannot be renamed through a helper signature.
                    if let Pat::Ident(pat_ident) = &**pat {
                        param_info.push((pat_ident.ident.clone(), pat.clone(), ty.clone()));
                    }
                } else {
                    let ident = Ident::new(&format!("__arg{}", index), Span::call_site());
                    let original_pat: Box<Pat> = pat.clone();
                    *pat = Box::new(syn::parse_quote! { #ident });
                    param_info.push((ident, original_pat, ty.clone()));
                }
            }
            FnArg::Receiver(receiver) => {
                return syn::Error::new_spanned(receiver, "composable functions cannot take self")
                    .to_compile_error()
                    .into();
            }
        }
    }

    let original_block = func.block.clone();
    let key_expr = quote! { compose_core::location_key(file!(), line!(), column!()) };

    let returns_unit = match &func.sig.output {
        ReturnType::Default => true,
        ReturnType::Type(_, ty) => matches!(&**ty, Type::Tuple(tuple) if tuple.elems.is_empty()),
    };
    let generics = func.sig.generics.clone();
    let restartable = enable_skip
        && returns_unit
        && generics.params.is_empty()
        && param_info
            .iter()
            .all(|(_, _, ty)| is_restartable_param(ty, &generics));

    if restartable {
        let fn_ident = func.sig.ident.clone();
        let helper_ident = Ident::new(&format!("__compose_impl_{}", fn_ident), Span::call_site());
        let vis = func.vis.clone();

        let helper_inputs: Vec<TokenStream2> = param_info
            .iter()
            .map(|(ident, _pat, ty)| quote! { #ident: #ty })
            .collect();
        let idents: Vec<&Ident> = param_info.iter().map(|(ident, _, _)| ident).collect();
        let rebinds: Vec<TokenStream2> = param_info
            .iter()
            .map(|(ident, pat, _)| quote! { let #pat = ::core::clone::Clone::clone(&#ident); })
            .collect();

        let helper_fn = quote! {
            #[allow(non_snake_case)]
            #[doc(hidden)]
            #vis fn #helper_ident(__key: compose_core::Key #(, #helper_inputs)*) {
                #[allow(unused_mut)]
                let mut __changed = compose_core::start_restart_group(__key);
                #(__changed |= compose_core::changed(&#idents);)*
                if __changed {
                    #(#rebinds)*
                    (move || #original_block)();
                } else {
                    compose_core::skip_to_group_end();
                }
                compose_core::end_restart_group(move || {
                    #helper_ident(__key #(, ::core::clone::Clone::clone(&#idents))*)
                });
            }
        };

        func.block = Box::new(syn::parse_quote!({
            #helper_ident(#key_expr #(, #idents)*)
        }));
        TokenStream::from(quote! {
            #helper_fn
            #func
        })
    } else {
        let rebinds: Vec<TokenStream2> = param_info
            .iter()
            .filter(|(_, _, ty)| !matches!(**ty, Type::ImplTrait(_)))
            .map(|(ident, pat, _)| quote! { let #pat = #ident; })
            .collect();
        let return_annotation = match &func.sig.output {
            ReturnType::Type(_, ty) if !matches!(**ty, Type::ImplTrait(_)) => quote! { -> #ty },
            _ => quote! {},
        };
        func.block = Box::new(syn::parse_quote!({
            compose_core::start_group(#key_expr);
            let __result = (move || #return_annotation {
                #(#rebinds)*
                #original_block
            })();
            compose_core::end_group();
            __result
        }));
        TokenStream::from(quote! { #func })
    }
}
