//! JSON Schema generation for tool arguments.

use serde_json::Value;

/// Schema for a tool's argument struct.
///
/// Subschemas are inlined so clients that cannot resolve `$defs`/`$ref`
/// still see every property.
pub fn schema_for<T: schemars::JsonSchema>() -> Value {
    let settings = schemars::generate::SchemaSettings::draft07().with(|s| {
        s.inline_subschemas = true;
    });
    let generator = settings.into_generator();
    let schema = generator.into_root_schema_for::<T>();
    let mut value = serde_json::to_value(&schema).unwrap_or_default();

    // Clients only need the object shape.
    if let Some(object) = value.as_object_mut() {
        object.remove("$schema");
        object.remove("title");
    }
    value
}
