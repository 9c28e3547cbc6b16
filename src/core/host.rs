use crate::core::catalog::{LookupEntry, PriceCatalog};
use crate::core::diagnostics::{DiagnosticLevel, DiagnosticSource, Diagnostics};
use crate::core::dimensions::{self, BuildingDimensions};
use crate::core::registry::{Declaration, SchemaRegistry};
use crate::core::section::SectionBuilder;
use crate::domain::model::{
    DeclarationRecord, EstimateSection, FormValue, InputDeclaration, PriceCatalogEntry,
    VariableDeclaration,
};
use crate::domain::value::{DeclaredValue, ValueType};
use crate::script::{ConsoleLevel, HostBridge, HostError, HostGlobal, HostRef, Value};

const SECTION: &str = "EstimateSection";
const DIMENSIONS: &str = "BuildingDimensions";

const HEADING_KIND: &str = "Heading";
const COUNTER_KIND: &str = "Counter";

/// The function surface a takeoff script sees, bound to one run's registries, catalog and
/// sections.
///
/// Holds no script values, so it can be built on one thread and run on another.
#[derive(Debug)]
pub struct HostApi {
    inputs: SchemaRegistry<InputDeclaration>,
    variables: SchemaRegistry<VariableDeclaration>,
    catalog: PriceCatalog,
    sections: SectionBuilder,
    dimensions: Vec<BuildingDimensions>,
    diagnostics: Diagnostics,
}

/// Everything a run produced through the host.
#[derive(Debug, Clone)]
pub struct HostOutput {
    pub input_records: Vec<DeclarationRecord>,
    pub variable_records: Vec<DeclarationRecord>,
    pub form_values: Vec<FormValue>,
    pub sections: Vec<EstimateSection>,
    pub lookups: Vec<LookupEntry>,
    pub diagnostics: Diagnostics,
}

impl HostApi {
    pub fn new(
        inputs: SchemaRegistry<InputDeclaration>,
        variables: SchemaRegistry<VariableDeclaration>,
        catalog: PriceCatalog,
    ) -> Self {
        Self {
            inputs,
            variables,
            catalog,
            sections: SectionBuilder::new(),
            dimensions: Vec::new(),
            diagnostics: Diagnostics::new(),
        }
    }

    pub fn diagnostics_mut(&mut self) -> &mut Diagnostics {
        &mut self.diagnostics
    }

    pub fn finish(self) -> HostOutput {
        HostOutput {
            form_values: self.inputs.form_values(),
            input_records: self.inputs.into_records(),
            variable_records: self.variables.into_records(),
            sections: self.sections.into_sections(),
            lookups: self.catalog.into_history(),
            diagnostics: self.diagnostics,
        }
    }

    fn get_user_input(&mut self, args: &[Value]) -> Result<Value, HostError> {
        let declaration = declaration("getUserInput", args, None)?;
        let value = self.inputs.declare(declaration, &mut self.diagnostics);
        Ok(to_script(&value))
    }

    fn get_variable(&mut self, args: &[Value]) -> Result<Value, HostError> {
        let mut declaration = declaration("getVariable", args, None)?;
        declaration.component_kind = None;
        declaration.component_props = "{}".to_string();
        let value = self.variables.declare(declaration, &mut self.diagnostics);
        Ok(to_script(&value))
    }

    fn get_count(&mut self, args: &[Value]) -> Result<Value, HostError> {
        let mut declaration = declaration("getCount", args, Some(DeclaredValue::Number(0.0)))?;
        declaration.value_type = ValueType::Number;
        declaration.component_kind = Some(COUNTER_KIND.to_string());
        let value = self.inputs.declare(declaration, &mut self.diagnostics);
        Ok(to_script(&value))
    }

    fn insert_heading(&mut self, args: &[Value]) -> Result<Value, HostError> {
        let name = required_name("insertHeading", args)?;
        let mut declaration = Declaration::new(name, DeclaredValue::Text(String::new()));
        declaration.description = optional_string(args.get(1));
        declaration.component_kind = Some(HEADING_KIND.to_string());
        let value = self.inputs.declare(declaration, &mut self.diagnostics);
        Ok(to_script(&value))
    }

    fn get_price(&mut self, args: &[Value]) -> Result<Value, HostError> {
        let name = arg_string(args, 0);
        let price = self.catalog.get(&name);
        if price.is_missing() {
            self.diagnostics
                .warn(DiagnosticSource::PriceLookup, format!("No price found for '{}'", name));
        } else {
            self.diagnostics.debug(
                DiagnosticSource::PriceLookup,
                format!("'{}' priced at {} {}", name, price.value, price.currency),
            );
        }
        Ok(Value::object_from([
            ("value", Value::Number(price.value)),
            ("currency", Value::str(&price.currency)),
        ]))
    }

    fn get_category_items(&mut self, args: &[Value]) -> Result<Value, HostError> {
        let category = arg_string(args, 0);
        let items = self.catalog.category_items(&category);
        if items.is_empty() {
            self.diagnostics.warn(
                DiagnosticSource::CategoryLookup,
                format!("No catalog items in category '{}'", category),
            );
        } else {
            self.diagnostics.debug(
                DiagnosticSource::CategoryLookup,
                format!("{} catalog items in category '{}'", items.len(), category),
            );
        }
        Ok(Value::array(items.iter().map(catalog_item).collect()))
    }

    fn create_section(&mut self, args: &[Value]) -> Result<Value, HostError> {
        let name = arg_string(args, 0);
        let id = self.sections.create(&name);
        Ok(Value::Host(HostRef { class: SECTION, id }))
    }

    fn add_part(&mut self, section: HostRef, args: &[Value]) -> Result<Value, HostError> {
        let part = match args.first() {
            Some(part @ Value::Object(_)) => part,
            _ => {
                return Err(HostError::type_error(
                    "addPart expects an object with name, qty and priceLookupKey",
                ))
            }
        };

        let name = optional_string(Some(&property(part, "name"))).unwrap_or_default();
        let quantity = property(part, "qty").to_number();
        let key = optional_string(Some(&property(part, "priceLookupKey"))).unwrap_or_default();

        let item = self
            .sections
            .add_part(section.id, &name, quantity, &key, &mut self.catalog)
            .ok_or_else(|| HostError::error("Section no longer exists"))?;
        if item.unit_price.is_nan() {
            self.diagnostics.warn(
                DiagnosticSource::PriceLookup,
                format!("No price found for '{}' (part '{}')", key, name),
            );
        }
        Ok(Value::Host(section))
    }

    fn section_parts(&self, section: usize) -> Value {
        let parts = self
            .sections
            .get(section)
            .map(|section| {
                section
                    .parts
                    .iter()
                    .map(|part| {
                        Value::object_from([
                            ("name", Value::str(&part.name)),
                            ("qty", Value::Number(part.quantity)),
                            ("priceLookupKey", Value::str(&part.price_lookup_key)),
                            ("pricePerUnit", Value::Number(part.unit_price)),
                            ("total", Value::Number(part.total)),
                            ("currency", Value::str(&part.currency)),
                        ])
                    })
                    .collect()
            })
            .unwrap_or_default();
        Value::array(parts)
    }
}

impl HostBridge for HostApi {
    fn globals(&self) -> Vec<HostGlobal> {
        vec![
            HostGlobal::Function("getUserInput"),
            HostGlobal::Function("getVariable"),
            HostGlobal::Function("getPrice"),
            HostGlobal::Function("getCategoryItems"),
            HostGlobal::Function("createSection"),
            HostGlobal::Function("insertHeading"),
            HostGlobal::Function("getCount"),
            HostGlobal::Class(DIMENSIONS),
        ]
    }

    fn call(&mut self, name: &str, this: Option<HostRef>, args: &[Value]) -> Result<Value, HostError> {
        match (this, name) {
            (None, "getUserInput") => self.get_user_input(args),
            (None, "getVariable") => self.get_variable(args),
            (None, "getCount") => self.get_count(args),
            (None, "insertHeading") => self.insert_heading(args),
            (None, "getPrice") => self.get_price(args),
            (None, "getCategoryItems") => self.get_category_items(args),
            (None, "createSection") => self.create_section(args),
            (Some(target), "addPart") if target.class == SECTION => self.add_part(target, args),
            (_, other) => Err(HostError::type_error(format!("{} is not a function", other))),
        }
    }

    fn construct(&mut self, class: &str, args: &[Value]) -> Result<Value, HostError> {
        if class != DIMENSIONS {
            return Err(HostError::type_error(format!("{} is not a constructor", class)));
        }

        let mut bd = BuildingDimensions::default();
        if let Some(source @ Value::Object(_)) = args.first() {
            for field in dimensions::FIELDS {
                let value = property(source, field);
                if !value.is_nullish() {
                    bd.set(field, value.to_number());
                }
            }
        }
        self.dimensions.push(bd);
        Ok(Value::Host(HostRef {
            class: DIMENSIONS,
            id: self.dimensions.len() - 1,
        }))
    }

    fn get_member(&mut self, target: HostRef, key: &str) -> Option<Value> {
        match target.class {
            SECTION => match key {
                "name" => self.sections.name(target.id).map(Value::str),
                "parts" => Some(self.section_parts(target.id)),
                "addPart" => Some(Value::native(
                    crate::script::value::Builtin::Host("addPart".into()),
                    Value::Host(target),
                )),
                _ => None,
            },
            DIMENSIONS => self
                .dimensions
                .get(target.id)
                .and_then(|bd| bd.get(key))
                .map(Value::Number),
            _ => None,
        }
    }

    fn set_member(&mut self, target: HostRef, key: &str, value: Value) -> Result<(), HostError> {
        let bd = match target.class {
            DIMENSIONS => self.dimensions.get_mut(target.id),
            _ => None,
        };
        match bd {
            Some(bd) if dimensions::FIELDS.contains(&key) => {
                bd.set(key, value.to_number());
                Ok(())
            }
            Some(_) if dimensions::GETTERS.contains(&key) => Err(HostError::type_error(format!(
                "Cannot set property {} of #<{}> which has only a getter",
                key, target.class
            ))),
            _ => Err(HostError::type_error(format!(
                "Cannot add property {}, object is not extensible",
                key
            ))),
        }
    }

    fn keys(&self, target: HostRef) -> Vec<String> {
        match target.class {
            SECTION => vec!["name".to_string(), "parts".to_string()],
            DIMENSIONS => dimensions::FIELDS.iter().map(|f| f.to_string()).collect(),
            _ => Vec::new(),
        }
    }

    fn console(&mut self, level: ConsoleLevel, message: &str) {
        let level = match level {
            ConsoleLevel::Debug => DiagnosticLevel::Debug,
            ConsoleLevel::Log | ConsoleLevel::Info => DiagnosticLevel::Info,
            ConsoleLevel::Warn => DiagnosticLevel::Warn,
            ConsoleLevel::Error => DiagnosticLevel::Error,
        };
        tracing::debug!("script console ({:?}): {}", level, message);
        self.diagnostics.push(level, DiagnosticSource::Console, message);
    }
}

/// Reads `(name, defaultValue, options)` into a declaration.
fn declaration(function: &str, args: &[Value], fallback: Option<DeclaredValue>) -> Result<Declaration, HostError> {
    let name = required_name(function, args)?;
    let default = match (args.get(1), fallback) {
        (None | Some(Value::Undefined), Some(fallback)) => fallback,
        (value, _) => from_script(value.unwrap_or(&Value::Undefined))
            .map_err(|reason| HostError::type_error(format!("{}('{}'): {}", function, name, reason)))?,
    };
    let mut declaration = Declaration::new(name, default);

    let options = match args.get(2) {
        Some(options @ Value::Object(_)) => options,
        _ => return Ok(declaration),
    };

    declaration.label = optional_string(Some(&property(options, "label")));
    declaration.description = optional_string(Some(&property(options, "description")));
    declaration.component_kind = optional_string(Some(&property(options, "component")));
    if let Some(raw) = optional_string(Some(&property(options, "type"))) {
        declaration.value_type = ValueType::parse(&raw).ok_or_else(|| {
            HostError::type_error(format!(
                "{}('{}'): unknown type '{}', expected number, string, boolean or object",
                function, declaration.name, raw
            ))
        })?;
    }

    let props = property(options, "props");
    if !props.is_nullish() {
        declaration.component_props = props
            .to_json()
            .map_err(|reason| HostError::type_error(format!("{}('{}'): props {}", function, declaration.name, reason)))?
            .map(|json| json.to_string())
            .unwrap_or_else(|| "{}".to_string());
    }
    Ok(declaration)
}

fn required_name(function: &str, args: &[Value]) -> Result<String, HostError> {
    match args.first() {
        Some(value) if !value.is_nullish() => Ok(value.to_js_string()),
        _ => Err(HostError::type_error(format!("{} requires a name", function))),
    }
}

fn arg_string(args: &[Value], index: usize) -> String {
    args.get(index).map(Value::to_js_string).unwrap_or_else(|| "undefined".to_string())
}

fn optional_string(value: Option<&Value>) -> Option<String> {
    value.filter(|v| !v.is_nullish()).map(Value::to_js_string)
}

fn property(object: &Value, key: &str) -> Value {
    match object {
        Value::Object(object) => object
            .borrow()
            .properties
            .get(key)
            .cloned()
            .unwrap_or(Value::Undefined),
        _ => Value::Undefined,
    }
}

fn catalog_item(item: &PriceCatalogEntry) -> Value {
    Value::object_from([
        ("name", Value::str(&item.name)),
        ("unitPrice", Value::Number(item.unit_price)),
        ("pricePerUnit", Value::Number(item.unit_price)),
        ("currency", Value::str(&item.currency)),
        ("category", Value::str(&item.category)),
        (
            "unitType",
            item.unit_type.as_deref().map(Value::str).unwrap_or(Value::Undefined),
        ),
    ])
}

/// Script value to declared value, typed after `typeof`.
fn from_script(value: &Value) -> Result<DeclaredValue, String> {
    match value {
        Value::Number(n) => Ok(DeclaredValue::Number(*n)),
        Value::Bool(b) => Ok(DeclaredValue::Boolean(*b)),
        Value::Str(s) => Ok(DeclaredValue::Text(s.to_string())),
        Value::Undefined | Value::Null => Ok(DeclaredValue::Text(String::new())),
        Value::Array(_) | Value::Object(_) => value
            .to_json()?
            .map(DeclaredValue::Structured)
            .ok_or_else(|| "default value cannot be stored".to_string()),
        Value::Function(_) | Value::Native(_) | Value::Host(_) => {
            Err("default value must be a number, string, boolean or plain object".to_string())
        }
    }
}

fn to_script(value: &DeclaredValue) -> Value {
    match value {
        DeclaredValue::Number(n) => Value::Number(*n),
        DeclaredValue::Text(s) => Value::str(s),
        DeclaredValue::Boolean(b) => Value::Bool(*b),
        DeclaredValue::Structured(json) => Value::from_json(json),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::{run_script, Limits, ScriptError, SCRIPT_STACK_SIZE};

    fn catalog() -> PriceCatalog {
        PriceCatalog::from_entries(vec![
            PriceCatalogEntry {
                name: "2x4x8".to_string(),
                unit_price: 2.5,
                currency: "USD".to_string(),
                category: "lumber".to_string(),
                unit_type: Some("piece".to_string()),
            },
            PriceCatalogEntry {
                name: "Toilet".to_string(),
                unit_price: 180.0,
                currency: "USD".to_string(),
                category: "bathroom".to_string(),
                unit_type: None,
            },
        ])
    }

    fn empty_host() -> HostApi {
        HostApi::new(SchemaRegistry::new(Vec::new()), SchemaRegistry::new(Vec::new()), catalog())
    }

    fn run(source: &str, host: HostApi) -> (HostOutput, Result<(), ScriptError>) {
        let source = source.to_string();
        std::thread::Builder::new()
            .stack_size(SCRIPT_STACK_SIZE)
            .spawn(move || {
                let mut host = host;
                let result = run_script(&source, &mut host, &Limits::default());
                (host.finish(), result)
            })
            .unwrap()
            .join()
            .unwrap()
    }

    #[test]
    fn prices_parts_into_sections() {
        let (output, result) = run(
            r#"
            const w = getUserInput('width', 20)
            const l = getUserInput('length', 40)
            const s = createSection('Lumber')
            s.addPart({ name: 'Studs', qty: w + l, priceLookupKey: '2x4x8' })
             .addPart({ name: 'Mystery', qty: 1, priceLookupKey: 'nope' })
            "#,
            empty_host(),
        );

        result.unwrap();
        assert_eq!(output.sections.len(), 1);
        let parts = &output.sections[0].parts;
        assert_eq!(parts[0].quantity, 60.0);
        assert_eq!(parts[0].total, 150.0);
        assert!(parts[1].total.is_nan());
        assert_eq!(output.input_records[0].value, "20");
        assert_eq!(output.input_records[1].value, "40");
    }

    #[test]
    fn price_miss_returns_sentinel_without_throwing() {
        let (output, result) = run(
            r#"
            const p = getPrice('nonexistent')
            if (!Number.isNaN(p.value) || p.currency !== '') throw new Error('bad sentinel')
            "#,
            empty_host(),
        );

        result.unwrap();
        assert_eq!(output.lookups.len(), 1);
        assert!(!output.lookups[0].was_found);
        assert_eq!(output.diagnostics.count_at_least(DiagnosticLevel::Warn), 1);
    }

    #[test]
    fn headings_and_counters_carry_component_kinds() {
        let (output, result) = run(
            r#"
            insertHeading('House', 'Basic sizes')
            const rooms = getCount('Rooms')
            const country = getUserInput('country', 'USA', {
                label: 'Destination Country',
                component: 'SegmentedControl',
                props: { data: ['USA', 'Mexico'] },
            })
            if (rooms !== 0 || country !== 'USA') throw new Error('unexpected values')
            "#,
            empty_host(),
        );

        result.unwrap();
        let records = &output.input_records;
        assert_eq!(records[0].component_kind.as_deref(), Some("Heading"));
        assert_eq!(records[0].description.as_deref(), Some("Basic sizes"));
        assert_eq!(records[0].value, "");
        assert_eq!(records[1].component_kind.as_deref(), Some("Counter"));
        assert_eq!(records[1].value_type, ValueType::Number);
        assert_eq!(records[2].label, "Destination Country");
        assert_eq!(records[2].component_props, r#"{"data":["USA","Mexico"]}"#);
        assert_eq!(records[2].position, 2);
    }

    #[test]
    fn building_dimensions_expose_fields_and_getters() {
        let (output, result) = run(
            r#"
            const bd = new BuildingDimensions({ width: 20, length: 40, wallHeight: 8 })
            const s = createSection('Walls')
            s.addPart({ name: 'Area', qty: bd.floorSurfaceArea, priceLookupKey: '2x4x8' })
            s.addPart({ name: 'Thickness', qty: bd.floorThickness, priceLookupKey: '2x4x8' })
            bd.width = 10
            s.addPart({ name: 'Smaller', qty: bd.floorSurfaceArea, priceLookupKey: '2x4x8' })
            if (!(bd instanceof BuildingDimensions)) throw new Error('instanceof')
            "#,
            empty_host(),
        );

        result.unwrap();
        let parts = &output.sections[0].parts;
        assert_eq!(parts[0].quantity, 800.0);
        assert_eq!(parts[1].quantity, 0.0);
        assert_eq!(parts[2].quantity, 400.0);
    }

    #[test]
    fn getters_are_read_only() {
        let (_, result) = run(
            "const bd = new BuildingDimensions({ width: 1 })\nbd.floorSurfaceArea = 3",
            empty_host(),
        );

        match result {
            Err(ScriptError::Uncaught { message, .. }) => {
                assert!(message.starts_with("TypeError"), "{}", message)
            }
            other => panic!("expected a TypeError, got {:?}", other),
        }
    }

    #[test]
    fn dimension_fields_are_writable_and_unknown_keys_are_not() {
        let (output, result) = run(
            r#"
            const bd = new BuildingDimensions({ width: 20, length: 40 })
            bd.length = 10
            bd.wallHeight = '9'
            createSection('Walls').addPart({ name: 'Area', qty: bd.floorSurfaceArea * bd.wallHeight, priceLookupKey: '2x4x8' })
            bd.color = 'red'
            "#,
            empty_host(),
        );

        assert_eq!(output.sections[0].parts[0].quantity, 1800.0);
        match result {
            Err(ScriptError::Uncaught { message, line }) => {
                assert!(message.contains("Cannot add property color"), "{}", message);
                assert_eq!(line, Some(6));
            }
            other => panic!("expected a TypeError, got {:?}", other),
        }

        let (output, result) = run(
            "const bd = new BuildingDimensions({ width: 20, length: 40 })\nbd.length = 10\ncreateSection('Walls').addPart({ name: 'Area', qty: bd.floorSurfaceArea, priceLookupKey: '2x4x8' })",
            empty_host(),
        );
        result.unwrap();
        assert_eq!(output.sections[0].parts[0].quantity, 200.0);
    }

    #[test]
    fn category_items_are_plain_objects() {
        let (output, result) = run(
            r#"
            const s = createSection('Bathroom')
            for (const item of getCategoryItems('bathroom')) {
                s.addPart({ name: item.name, qty: 2, priceLookupKey: item.name })
            }
            if (getCategoryItems('garage').length !== 0) throw new Error('garage')
            console.log('done', s.parts.length)
            "#,
            empty_host(),
        );

        result.unwrap();
        assert_eq!(output.sections[0].parts[0].total, 360.0);
        let console: Vec<_> = output
            .diagnostics
            .entries()
            .iter()
            .filter(|d| d.source == DiagnosticSource::Console)
            .collect();
        assert_eq!(console.len(), 1);
        assert_eq!(console[0].message, "done 1");
    }

    #[test]
    fn variables_resolve_persisted_values() {
        let variables = SchemaRegistry::new(vec![VariableDeclaration {
            name: "studsPerFoot".to_string(),
            value: "5".to_string(),
            value_type: ValueType::Number,
            description: None,
            manually_created: false,
        }]);
        let host = HostApi::new(SchemaRegistry::new(Vec::new()), variables, catalog());

        let (output, result) = run(
            "const n = getVariable('studsPerFoot', 1)\nif (n !== 5) throw new Error('got ' + n)",
            host,
        );

        result.unwrap();
        assert_eq!(output.variable_records[0].value, "5");
    }

    #[test]
    fn bad_option_type_throws_type_error() {
        let (_, result) = run("getUserInput('x', 1, { type: 'date' })", empty_host());
        assert!(matches!(result, Err(ScriptError::Uncaught { .. })));
    }
}
