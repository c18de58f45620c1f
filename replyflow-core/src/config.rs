use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct ReplyflowConfig {
    pub service: ServiceConfig,
    pub http: HttpConfig,
    pub resolver: ResolverConfig,
    pub cache: CacheConfig,
    pub generation: GenerationConfig,
    pub store: StoreConfig,
    pub fallback: FallbackConfig,
    pub knowledge: KnowledgeTable,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServiceConfig {
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8780,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ResolverConfig {
    /// Utterances longer than this (in characters) are truncated, never rejected.
    pub max_utterance_chars: usize,
    /// Upper bound on the serialized parameters/context folded into a cache key.
    pub max_parameter_chars: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_utterance_chars: 500,
            max_parameter_chars: 200,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_seconds: u64,
    pub max_entries: usize,
    pub sweep_batch: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 600,
            max_entries: 100,
            sweep_batch: 20,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GenerationConfig {
    pub base_url: String,
    pub model: String,
    /// Falls back to `DEEPSEEK_API_KEY` when unset.
    pub api_key: Option<String>,
    pub timeout_ms: u64,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
    pub max_reply_chars: usize,
    /// Prefix undecorated replies with a topic emoji.
    pub topic_emoji: bool,
    pub user_agent: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.deepseek.com/v1".to_string(),
            model: "deepseek-chat".to_string(),
            api_key: None,
            timeout_ms: 4000,
            max_tokens: 400,
            temperature: 0.7,
            top_p: 0.9,
            frequency_penalty: 0.1,
            presence_penalty: 0.1,
            max_reply_chars: 800,
            topic_emoji: false,
            user_agent: concat!("replyflow/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl GenerationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Configured key, else the `DEEPSEEK_API_KEY` environment variable.
    /// Blank values count as missing.
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var("DEEPSEEK_API_KEY").ok())
            .filter(|k| !k.trim().is_empty())
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StoreConfig {
    pub name: String,
    pub facts: String,
    pub instructions: Vec<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            name: "American Store".to_string(),
            facts: "American Store es una tienda online colombiana especializada en:\n\
                    - Ropa importada original de Estados Unidos\n\
                    - Perfumes réplica de alta calidad\n\
                    \n\
                    Servicios:\n\
                    - Envíos a toda Colombia\n\
                    - Pagos: Contraentrega, transferencia, Nequi, Daviplata\n\
                    - Horario: Lunes a Sábado 8:00 AM a 6:00 PM\n\
                    \n\
                    Contacto:\n\
                    - WhatsApp: +57 320 890 0000\n\
                    - Instagram: @americanstore"
                .to_string(),
            instructions: vec![
                "Mantén siempre un tono amigable y profesional".to_string(),
                "Si no tienes información específica, sugiere contactar al asesor por WhatsApp"
                    .to_string(),
                "Para preguntas de stock específico, dirige a la tienda online".to_string(),
                "Enfatiza la calidad y originalidad de los productos".to_string(),
                "Tranquiliza sobre la seguridad de envíos y pagos".to_string(),
                "No inventes información que no esté en el contexto".to_string(),
                "Si la pregunta es muy general, ofrece opciones específicas".to_string(),
            ],
        }
    }
}

/// Canned replies for the last resolution stage, one per failure reason.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FallbackConfig {
    pub timeout: String,
    pub connection: String,
    pub unauthorized: String,
    pub rate_limited: String,
    pub unavailable: String,
    pub invalid_input: String,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            timeout: "La consulta está tomando más tiempo del esperado. Para una respuesta rápida, \
                      contacta a nuestro asesor por WhatsApp."
                .to_string(),
            connection: "Estamos experimentando problemas de conexión. Por favor, contacta a \
                         nuestro asesor por WhatsApp para obtener ayuda inmediata."
                .to_string(),
            unauthorized: "Disculpa, hay un problema técnico con el sistema. Nuestro asesor por \
                           WhatsApp te puede ayudar de inmediato."
                .to_string(),
            rate_limited: "El sistema está muy ocupado en este momento. ¿Podrías intentar en unos \
                           minutos o contactar a nuestro asesor?"
                .to_string(),
            unavailable: "No pude procesar tu consulta en este momento. Para obtener ayuda \
                          personalizada, puedes contactar a nuestro asesor por WhatsApp. ¿Hay algo \
                          más en lo que pueda ayudarte?"
                .to_string(),
            invalid_input: "Lo siento, no pude procesar tu consulta. ¿Puedes reformular la pregunta?"
                .to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct KnowledgeEntryConfig {
    pub name: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(default)]
    pub intents: Vec<String>,
    pub response: String,
}

/// Ordered knowledge table; earlier entries win.
#[derive(Debug, Deserialize, Clone)]
#[serde(transparent)]
pub struct KnowledgeTable(pub Vec<KnowledgeEntryConfig>);

impl Default for KnowledgeTable {
    fn default() -> Self {
        fn entry(name: &str, keywords: &[&str], intents: &[&str], response: &str) -> KnowledgeEntryConfig {
            KnowledgeEntryConfig {
                name: name.to_string(),
                keywords: keywords.iter().map(|k| k.to_string()).collect(),
                patterns: Vec::new(),
                intents: intents.iter().map(|i| i.to_string()).collect(),
                response: response.to_string(),
            }
        }

        Self(vec![
            entry(
                "saludo",
                &["hola", "buenas", "buenos días", "buenas tardes", "buenas noches"],
                &["Default Welcome Intent"],
                "¡Bienvenido a American Store! ¿Quieres conocer nuestras ofertas o productos?",
            ),
            entry(
                "ofertas",
                &["oferta", "ofertas", "descuento", "descuentos", "promoción", "promociones"],
                &["Ofertas Intent"],
                "Actualmente tenemos 20% de descuento en ropa para hombre y envío gratis en todas las compras.",
            ),
            entry(
                "contacto",
                &["contacto", "whatsapp", "teléfono", "telefono", "correo"],
                &["Contacto Intent"],
                "Puedes contactarnos vía WhatsApp al 3117112995 o por correo: administrador@americanstor.online",
            ),
            entry(
                "devoluciones",
                &["devolución", "devoluciones", "cambio de talla"],
                &["Cambios_Devoluciones"],
                "Puedes solicitar cambios o devoluciones escribiéndonos por WhatsApp con tu número de pedido; te guiamos en todo el proceso.",
            ),
            entry(
                "categorias",
                &["catálogo", "catalogo", "categorías", "categorias"],
                &["Consulta_Categorias"],
                "Manejamos ropa importada original de Estados Unidos para hombre y mujer, y perfumes de alta calidad. ¿Quieres que te comparta el catálogo?",
            ),
            entry(
                "comparacion_precios",
                &[],
                &["Comparacion_Precios"],
                "Puedes comparar precios en nuestra tienda online. ¿Quieres el link directo?",
            ),
            entry(
                "marca",
                &[],
                &["Consulta_Marca"],
                "Sí, manejamos productos {marca} originales. ¿Quieres que te comparta el catálogo?",
            ),
        ])
    }
}

impl ReplyflowConfig {
    /// Load from a TOML file (optional) layered under `REPLYFLOW__*` env vars.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("REPLYFLOW")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        s.try_deserialize()
    }

    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?;
        s.try_deserialize()
    }
}
