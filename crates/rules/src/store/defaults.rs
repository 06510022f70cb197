//! Built-in profiles seeded by `profiles init` and `ProfileStore::with_defaults`.

use serde_json::json;

use crate::schema::{FilterProfile, FilterRule, RuleKind};

pub fn default_profiles() -> Vec<FilterProfile> {
    vec![startup_tech(), sostenibilidad(), investigacion(), formacion_empleo(), nonprofit(), test_placsp()]
}

fn startup_tech() -> FilterProfile {
    FilterProfile::new(
        "startup_tech",
        "Startups y PYMEs tecnológicas",
        vec![
            FilterRule::keywords(
                "startup_keywords",
                RuleKind::Include,
                &[
                    "startup", "pyme", "pequeña empresa", "microempresa", "emprendedor",
                    "innovación", "i+d+i", "digitalización", "transformación digital",
                ],
            )
            .weight(2.0)
            .describe("Palabras clave para startups"),
            FilterRule::keywords(
                "tech_keywords",
                RuleKind::Include,
                &[
                    "tecnología", "software", "app", "inteligencia artificial", "ia",
                    "blockchain", "fintech", "healthtech", "edtech", "cleantech",
                ],
            )
            .weight(1.5)
            .describe("Sectores tecnológicos"),
            FilterRule::keywords(
                "next_generation",
                RuleKind::Include,
                &["next generation", "ngeu", "prtr", "plan de recuperación", "fondos europeos"],
            )
            .weight(2.5)
            .describe("Fondos Next Generation EU"),
            FilterRule::keywords(
                "exclude_large",
                RuleKind::Exclude,
                &["gran empresa", "multinacional", "sector público", "administración"],
            )
            .describe("Excluir grandes empresas"),
            FilterRule::new("min_amount", RuleKind::AmountRange, json!({"min": 5000, "max": 500000}))
                .weight(1.2)
                .describe("Rango de cuantía adecuado"),
        ],
        0.6,
    )
}

fn sostenibilidad() -> FilterProfile {
    FilterProfile::new(
        "sostenibilidad",
        "Proyectos de sostenibilidad y medio ambiente",
        vec![
            FilterRule::keywords(
                "green_keywords",
                RuleKind::Include,
                &[
                    "sostenibilidad", "medioambiente", "medio ambiente", "economía circular",
                    "energías renovables", "eficiencia energética", "carbono neutral",
                    "transición ecológica", "green", "bio", "eco",
                ],
            )
            .weight(2.0)
            .describe("Palabras sostenibilidad"),
            FilterRule::keywords(
                "climate_keywords",
                RuleKind::Include,
                &[
                    "cambio climático", "emisiones", "descarbonización", "biodiversidad",
                    "agua", "residuos", "reciclaje", "movilidad sostenible",
                ],
            )
            .weight(1.8)
            .describe("Cambio climático y recursos"),
            FilterRule::keywords(
                "eu_green_deal",
                RuleKind::Include,
                &["green deal", "pacto verde", "taxonomía verde", "fit for 55"],
            )
            .weight(2.2)
            .describe("Green Deal Europeo"),
        ],
        0.5,
    )
}

fn investigacion() -> FilterProfile {
    FilterProfile::new(
        "investigacion",
        "Investigación, desarrollo e innovación",
        vec![
            FilterRule::keywords(
                "research_keywords",
                RuleKind::Include,
                &[
                    "investigación", "desarrollo", "i+d", "i+d+i", "ciencia", "innovación",
                    "proyecto de investigación", "centro tecnológico", "universidad",
                ],
            )
            .weight(2.0)
            .describe("Investigación y desarrollo"),
            FilterRule::keywords(
                "scientific_areas",
                RuleKind::Include,
                &[
                    "biotecnología", "nanotecnología", "materiales avanzados", "medicina",
                    "farmacéutico", "aeroespacial", "robótica", "automatización",
                ],
            )
            .weight(1.7)
            .describe("Áreas científicas"),
            FilterRule::keywords(
                "collaboration",
                RuleKind::Include,
                &["consorcio", "colaboración", "transferencia tecnológica", "spin-off"],
            )
            .weight(1.5)
            .describe("Colaboración científica"),
        ],
        0.4,
    )
}

fn formacion_empleo() -> FilterProfile {
    FilterProfile::new(
        "formacion_empleo",
        "Formación, empleo e inclusión social",
        vec![
            FilterRule::keywords(
                "training_keywords",
                RuleKind::Include,
                &[
                    "formación", "capacitación", "cualificación", "recualificación",
                    "upskilling", "reskilling", "certificación", "competencias",
                ],
            )
            .weight(1.8)
            .describe("Formación y capacitación"),
            FilterRule::keywords(
                "employment_keywords",
                RuleKind::Include,
                &[
                    "empleo", "inserción laboral", "orientación laboral", "autoempleo",
                    "trabajo", "contratación", "inclusión laboral",
                ],
            )
            .weight(1.5)
            .describe("Empleo y trabajo"),
            FilterRule::keywords(
                "vulnerable_groups",
                RuleKind::Include,
                &[
                    "jóvenes", "mujeres", "desempleados", "parados de larga duración",
                    "personas con discapacidad", "mayores de 45", "rural",
                ],
            )
            .weight(1.3)
            .describe("Grupos vulnerables"),
        ],
        0.4,
    )
}

fn nonprofit() -> FilterProfile {
    FilterProfile::new(
        "nonprofit",
        "Organizaciones sin ánimo de lucro (ONGs, fundaciones, asociaciones)",
        vec![
            FilterRule::keywords(
                "nonprofit_required",
                RuleKind::Include,
                &[
                    "sin ánimo de lucro", "sin fines de lucro", "entidad sin ánimo de lucro",
                    "organización sin ánimo de lucro",
                ],
            )
            .weight(3.0)
            .required()
            .describe("Palabras clave requeridas para entidades sin ánimo de lucro"),
            FilterRule::keywords(
                "entity_types",
                RuleKind::Include,
                &[
                    "fundación", "asociación", "ONG", "entidad social", "tercer sector",
                    "cooperativa social", "entidades no lucrativas",
                ],
            )
            .weight(2.0)
            .describe("Tipos de entidades sin ánimo de lucro"),
            FilterRule::keywords(
                "social_activities",
                RuleKind::Include,
                &[
                    "actividades sociales", "acción social", "servicios sociales", "voluntariado",
                    "solidaridad", "beneficencia", "asistencia social", "interés general",
                    "utilidad pública",
                ],
            )
            .weight(1.5)
            .describe("Actividades de interés social"),
            FilterRule::keywords(
                "exclude_profit",
                RuleKind::Exclude,
                &[
                    "con ánimo de lucro", "empresa privada", "sociedad mercantil",
                    "sociedad anónima", "sociedad limitada", "S.A.", "S.L.",
                ],
            )
            .weight(2.0)
            .describe("Excluir entidades con ánimo de lucro"),
        ],
        0.8,
    )
}

fn test_placsp() -> FilterProfile {
    FilterProfile::new(
        "test_placsp",
        "Perfil permisivo para el feed de contratación",
        vec![FilterRule::keywords(
            "generic_terms",
            RuleKind::Include,
            &["contrato", "suministro", "servicio", "obra", "acuerdo marco", "licitación"],
        )
        .required()
        .describe("Términos genéricos de contratación")],
        0.1,
    )
}
