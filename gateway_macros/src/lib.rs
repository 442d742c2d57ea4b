use proc_macro::TokenStream;
use quote::quote;
use syn::{
    parse::Parse, parse_macro_input, FnArg, GenericArgument, ItemImpl, LitStr, PathArguments,
    ReturnType, Token, Type,
};

/// Proc macro attribute turning an impl block with a typed `call` method into a gateway tool.
///
/// Apply this to an `impl` block that contains an async `call` method.
/// The macro will:
/// - Use the provided tool name and description from attributes
/// - Infer the input type from the call method parameter
/// - Infer the output type from the return type `Result<T, ToolError>`
/// - Generate the `Tool` impl: cached metadata with JSON schemas, and a `run`
///   that validates the context input before calling `call`
///
/// # Example
/// ```ignore
/// #[tool(name = "addition", description = "Add two integers a and b")]
/// impl AdditionTool {
///     async fn call(&self, input: AdditionInput) -> Result<AdditionOutput, ToolError> {
///         Ok(AdditionOutput { result: input.a + input.b })
///     }
/// }
/// ```
struct ToolArgs {
    name: LitStr,
    description: LitStr,
}

impl Parse for ToolArgs {
    fn parse(input: syn::parse::ParseStream) -> syn::Result<Self> {
        let mut name = None;
        let mut description = None;

        while !input.is_empty() {
            let key: syn::Ident = input.parse()?;
            input.parse::<Token![=]>()?;
            let value: LitStr = input.parse()?;

            match key.to_string().as_str() {
                "name" => name = Some(value),
                "description" => description = Some(value),
                _ => {
                    return Err(syn::Error::new(
                        key.span(),
                        "expected 'name' or 'description'",
                    ))
                }
            }

            if !input.is_empty() {
                input.parse::<Token![,]>()?;
            }
        }

        Ok(ToolArgs {
            name: name.ok_or_else(|| input.error("missing 'name' attribute"))?,
            description: description
                .ok_or_else(|| input.error("missing 'description' attribute"))?,
        })
    }
}

#[proc_macro_attribute]
pub fn tool(attr: TokenStream, item: TokenStream) -> TokenStream {
    let args = parse_macro_input!(attr as ToolArgs);
    let impl_block = parse_macro_input!(item as ItemImpl);

    match expand(args, &impl_block) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn expand(args: ToolArgs, impl_block: &ItemImpl) -> syn::Result<proc_macro2::TokenStream> {
    let self_ty = &impl_block.self_ty;
    if !matches!(&**self_ty, Type::Path(_)) {
        return Err(syn::Error::new_spanned(
            self_ty,
            "tool can only be applied to impl blocks for named types",
        ));
    }

    let call_method = impl_block
        .items
        .iter()
        .find_map(|item| match item {
            syn::ImplItem::Fn(method) if method.sig.ident == "call" => Some(method),
            _ => None,
        })
        .ok_or_else(|| {
            syn::Error::new_spanned(self_ty, "tool impl must contain an async fn call method")
        })?;

    // First parameter is &self.
    let input_type = call_method
        .sig
        .inputs
        .iter()
        .nth(1)
        .and_then(|arg| match arg {
            FnArg::Typed(pat_type) => Some(&*pat_type.ty),
            FnArg::Receiver(_) => None,
        })
        .ok_or_else(|| {
            syn::Error::new_spanned(&call_method.sig, "call method must have an input parameter")
        })?;

    let output_type = match &call_method.sig.output {
        ReturnType::Type(_, ty) => extract_result_ok_type(ty).ok_or_else(|| {
            syn::Error::new_spanned(ty, "call method must return Result<T, ToolError>")
        })?,
        ReturnType::Default => {
            return Err(syn::Error::new_spanned(
                &call_method.sig,
                "call method must have a return type",
            ))
        }
    };

    let tool_name = args.name.value();
    let tool_description = args.description.value();

    Ok(quote! {
        #impl_block

        #[::assistant_gateway::async_trait]
        impl ::assistant_gateway::tools::Tool for #self_ty {
            fn metadata(&self) -> &::assistant_gateway::tools::ToolMetadata {
                static METADATA: ::std::sync::OnceLock<::assistant_gateway::tools::ToolMetadata> =
                    ::std::sync::OnceLock::new();
                METADATA.get_or_init(|| {
                    ::assistant_gateway::tools::typed::metadata_for::<#input_type, #output_type>(
                        #tool_name,
                        #tool_description,
                    )
                })
            }

            async fn run(
                &self,
                context: &::assistant_gateway::tools::ToolContext,
            ) -> ::std::result::Result<
                ::assistant_gateway::model::ToolResult,
                ::assistant_gateway::tools::ToolError,
            > {
                let input: #input_type =
                    ::assistant_gateway::tools::typed::parse_input(#tool_name, context)?;
                let output = self.call(input).await?;
                ::assistant_gateway::tools::typed::into_result(#tool_name, output)
            }
        }
    })
}

/// Extract the Ok type from Result<T, E>
fn extract_result_ok_type(ty: &Type) -> Option<&Type> {
    if let Type::Path(type_path) = ty {
        let segment = type_path.path.segments.last()?;
        if segment.ident == "Result" {
            if let PathArguments::AngleBracketed(args) = &segment.arguments {
                if let Some(GenericArgument::Type(ok_type)) = args.args.first() {
                    return Some(ok_type);
                }
            }
        }
    }
    None
}
