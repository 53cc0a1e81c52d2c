use crate::{
    ConstExpr, ElementSegment, Export, ExportKind, Global, Import, ImportDesc, Module, ModuleKind,
    TableType,
};
use anyhow::Context;
use wasmlink_core::{FuncType, SymbolTable, ValType};

/// The set of WebAssembly features accepted in modules.
const SUPPORTED_FEATURES: wasmparser::WasmFeatures = {
    macro_rules! features {
        ($($name:ident),*) => {{
            let features = wasmparser::WasmFeatures::empty();
            $(
                let features = features.union(wasmparser::WasmFeatures::$name);
            )*
            features
        }};
    }

    features! {
        MUTABLE_GLOBAL,
        SATURATING_FLOAT_TO_INT,
        SIGN_EXTENSION,
        REFERENCE_TYPES,
        MULTI_VALUE,
        BULK_MEMORY,
        FLOATS
    }
};

fn convert_val_type(ty: wasmparser::ValType) -> anyhow::Result<ValType> {
    use wasmparser::{RefType, ValType as Ty};

    Ok(match ty {
        Ty::I32 => ValType::I32,
        Ty::I64 => ValType::I64,
        Ty::F32 => ValType::F32,
        Ty::F64 => ValType::F64,
        Ty::V128 => ValType::V128,
        Ty::Ref(RefType::FUNCREF) => ValType::FuncRef,
        Ty::Ref(RefType::EXTERNREF) => ValType::ExternRef,
        Ty::Ref(unsupported) => anyhow::bail!("unsupported reference type {unsupported:?}"),
    })
}

fn convert_func_type(ty: &wasmparser::FuncType) -> anyhow::Result<FuncType> {
    Ok(FuncType {
        params: ty
            .params()
            .iter()
            .copied()
            .map(convert_val_type)
            .collect::<anyhow::Result<_>>()?,
        results: ty
            .results()
            .iter()
            .copied()
            .map(convert_val_type)
            .collect::<anyhow::Result<_>>()?,
    })
}

fn convert_table_type(ty: &wasmparser::TableType) -> anyhow::Result<TableType> {
    let initial = u32::try_from(u64::from(ty.initial)).context("table is too large")?;
    let maximum = ty
        .maximum
        .map(|maximum| u32::try_from(u64::from(maximum)).unwrap_or(u32::MAX));

    Ok(TableType { initial, maximum })
}

fn convert_const_expr(expr: &wasmparser::ConstExpr) -> anyhow::Result<ConstExpr> {
    use wasmparser::Operator;

    let mut operators = expr.get_operators_reader();
    let value = match operators.read()? {
        Operator::I32Const { value } => ConstExpr::I32(value),
        Operator::I64Const { value } => ConstExpr::I64(value),
        Operator::F32Const { value } => ConstExpr::F32(value.bits()),
        Operator::F64Const { value } => ConstExpr::F64(value.bits()),
        Operator::GlobalGet { global_index } => ConstExpr::GlobalGet(global_index),
        Operator::RefNull { .. } => ConstExpr::RefNull,
        Operator::RefFunc { function_index } => ConstExpr::RefFunc(function_index),
        unsupported => anyhow::bail!("unsupported constant expression {unsupported:?}"),
    };

    match operators.read()? {
        Operator::End => Ok(value),
        extended => anyhow::bail!("unsupported extended constant expression {extended:?}"),
    }
}

/// Decodes and validates a WebAssembly binary, extracting the information needed to link it.
///
/// All names are interned into `symbols`. The `kind` describes how the module will be executed,
/// and does not affect how it is decoded. The returned [`Module`] has no name, see
/// [`Module::with_name()`].
///
/// # Errors
///
/// Returns an error if the module is malformed or invalid, or uses unsupported features.
pub fn decode(wasm: &[u8], kind: ModuleKind, symbols: &mut SymbolTable) -> anyhow::Result<Module> {
    let mut validator = wasmparser::Validator::new_with_features(SUPPORTED_FEATURES);
    let mut imports = Vec::new();
    let mut import_func_types = Vec::new();
    let mut import_global_count = 0u32;
    let mut table = None;
    let mut globals = Vec::new();
    let mut exports = Vec::new();
    let mut elements = Vec::new();
    let mut dylink = None;

    for result in wasmparser::Parser::new(0).parse_all(wasm) {
        use wasmparser::Payload;

        match result? {
            Payload::Version {
                num,
                encoding,
                range,
            } => {
                validator.version(num, encoding, &range)?;
            }
            Payload::TypeSection(section) => {
                validator.type_section(&section)?;
            }
            Payload::ImportSection(section) => {
                validator.import_section(&section)?;

                imports.reserve(section.count() as usize);
                for result in section.into_iter_with_offsets() {
                    use wasmparser::TypeRef;

                    let (import_offset, import) = result?;
                    let desc = match import.ty {
                        TypeRef::Func(_) => {
                            import_func_types.push(imports.len());
                            // Resolved once the validator knows every type.
                            ImportDesc::Func(FuncType::default())
                        }
                        TypeRef::Global(global) => {
                            import_global_count += 1;
                            ImportDesc::Global {
                                ty: convert_val_type(global.content_type).with_context(|| {
                                    format!("invalid global import @ {import_offset:#X}")
                                })?,
                                mutable: global.mutable,
                            }
                        }
                        TypeRef::Table(table_type) => {
                            if table.is_none() {
                                table = Some(convert_table_type(&table_type)?);
                            }
                            ImportDesc::Table
                        }
                        TypeRef::Memory(_) => ImportDesc::Memory,
                        TypeRef::Tag(_) => {
                            anyhow::bail!("tag imports are not supported @ {import_offset:#X}")
                        }
                    };

                    imports.push(Import {
                        module: symbols.intern_str(import.module),
                        field: symbols.intern_str(import.name),
                        desc,
                    });
                }
            }
            Payload::FunctionSection(section) => {
                validator.function_section(&section)?;
            }
            Payload::TableSection(section) => {
                validator.table_section(&section)?;

                for result in section {
                    let defined = result?;
                    if table.is_none() {
                        table = Some(convert_table_type(&defined.ty)?);
                    }
                }
            }
            Payload::MemorySection(section) => {
                validator.memory_section(&section)?;
            }
            Payload::TagSection(section) => {
                validator.tag_section(&section)?;
                anyhow::bail!("tag section is not supported");
            }
            Payload::GlobalSection(section) => {
                validator.global_section(&section)?;

                globals.reserve(section.count() as usize);
                for result in section.into_iter_with_offsets() {
                    let (global_offset, global) = result?;
                    let id = import_global_count as usize + globals.len();
                    globals.push(Global {
                        ty: convert_val_type(global.ty.content_type)?,
                        mutable: global.ty.mutable,
                        init: convert_const_expr(&global.init_expr).with_context(|| {
                            format!("invalid initializer for global #{id} @ {global_offset:#X}")
                        })?,
                    });
                }
            }
            Payload::ExportSection(section) => {
                validator.export_section(&section)?;

                exports.reserve(section.count() as usize);
                for result in section.into_iter_with_offsets() {
                    use wasmparser::ExternalKind;

                    let (export_offset, export) = result?;
                    let kind = match export.kind {
                        ExternalKind::Func => ExportKind::Func,
                        ExternalKind::Table => ExportKind::Table,
                        ExternalKind::Memory => ExportKind::Memory,
                        ExternalKind::Global => ExportKind::Global,
                        ExternalKind::Tag => {
                            anyhow::bail!("tag exports are not supported @ {export_offset:#X}")
                        }
                    };

                    exports.push(Export {
                        name: symbols.intern_str(export.name),
                        kind,
                        index: export.index,
                    });
                }
            }
            Payload::StartSection { func, range } => {
                validator.start_section(func, &range)?;
            }
            Payload::ElementSection(section) => {
                validator.element_section(&section)?;

                for result in section.into_iter_with_offsets() {
                    use wasmparser::{ElementItems, ElementKind};

                    let (segment_offset, segment) = result?;
                    let offset = match segment.kind {
                        ElementKind::Active {
                            table_index: None | Some(0),
                            offset_expr,
                        } => convert_const_expr(&offset_expr).with_context(|| {
                            format!("invalid element segment offset @ {segment_offset:#X}")
                        })?,
                        // Only the first table takes part in indirect calls.
                        _ => continue,
                    };

                    let functions = match segment.items {
                        ElementItems::Functions(indices) => indices
                            .into_iter()
                            .map(|index| index.map(Some))
                            .collect::<Result<Box<[_]>, _>>()?,
                        ElementItems::Expressions(_, expressions) => {
                            let mut functions = Vec::with_capacity(expressions.count() as usize);
                            for expr in expressions {
                                functions.push(match convert_const_expr(&expr?)? {
                                    ConstExpr::RefFunc(index) => Some(index),
                                    _ => None,
                                });
                            }
                            functions.into_boxed_slice()
                        }
                    };

                    elements.push(ElementSegment { offset, functions });
                }
            }
            Payload::DataCountSection { count, range } => {
                validator.data_count_section(count, &range)?
            }
            Payload::DataSection(section) => {
                validator.data_section(&section)?;
            }
            Payload::CodeSectionStart {
                count,
                range,
                size: _,
            } => {
                validator.code_section_start(count, &range)?;
            }
            Payload::CodeSectionEntry(body) => {
                let mut function = validator
                    .code_section_entry(&body)?
                    .into_validator(Default::default());
                function.validate(&body)?;
            }
            Payload::CustomSection(section) => {
                if section.name() == crate::dylink::SECTION_NAME {
                    let info = crate::dylink::parse(section.data(), symbols).with_context(|| {
                        format!("invalid dylink section @ {:#X}", section.data_offset())
                    })?;
                    dylink = Some(info);
                }
            }
            Payload::End(offset) => {
                let types = validator.end(offset)?;

                let mut func_types = Vec::with_capacity(types.core_function_count() as usize);
                for index in 0..types.core_function_count() {
                    let ty = types[types.core_function_at(index)].unwrap_func();
                    func_types.push(
                        convert_func_type(ty)
                            .with_context(|| format!("invalid type for function #{index}"))?,
                    );
                }

                for (func_index, import_index) in import_func_types.iter().enumerate() {
                    imports[*import_index].desc = ImportDesc::Func(func_types[func_index].clone());
                }

                return Ok(Module {
                    kind,
                    name: None,
                    func_types: func_types.into_boxed_slice(),
                    imports: imports.into_boxed_slice(),
                    import_func_count: import_func_types.len() as u32,
                    import_global_count,
                    globals: globals.into_boxed_slice(),
                    table,
                    elements: elements.into_boxed_slice(),
                    exports: exports.into_boxed_slice(),
                    dylink,
                });
            }
            // Component model is not supported
            Payload::ModuleSection {
                parser: _,
                unchecked_range,
            } => validator.module_section(&unchecked_range)?,
            Payload::InstanceSection(section) => validator.instance_section(&section)?,
            Payload::CoreTypeSection(section) => validator.core_type_section(&section)?,
            Payload::ComponentSection {
                parser: _,
                unchecked_range,
            } => validator.component_section(&unchecked_range)?,
            Payload::ComponentInstanceSection(section) => {
                validator.component_instance_section(&section)?
            }
            Payload::ComponentAliasSection(section) => {
                validator.component_alias_section(&section)?
            }
            Payload::ComponentTypeSection(section) => validator.component_type_section(&section)?,
            Payload::ComponentCanonicalSection(section) => {
                validator.component_canonical_section(&section)?
            }
            Payload::ComponentStartSection { start, range } => {
                validator.component_start_section(&start, &range)?
            }
            Payload::ComponentImportSection(section) => {
                validator.component_import_section(&section)?
            }
            Payload::ComponentExportSection(section) => {
                validator.component_export_section(&section)?
            }
            Payload::UnknownSection {
                id,
                contents: _,
                range,
            } => validator.unknown_section(id, &range)?,
        }
    }

    // Either a `Payload::End` is processed, or an `Err` is returned.
    unreachable!()
}
