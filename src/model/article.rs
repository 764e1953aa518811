/// A guide in the learning center. The catalog is fixed and needs no account to read.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Article {
    pub category: &'static str,
    pub title: &'static str,
    pub description: &'static str,
}

const ARTICLES: &[Article] = &[
    Article {
        category: "Formalización",
        title: "5 Pasos para Formalizar tu Negocio en México",
        description: "Aprende los requisitos y el proceso para registrar tu emprendimiento y \
                      operar de manera formal.",
    },
    Article {
        category: "Finanzas Básicas",
        title: "¿Qué es el Punto de Equilibrio y Cómo Calcularlo?",
        description: "Una guía sencilla para entender cuántas ventas necesitas para empezar a \
                      generar ganancias.",
    },
    Article {
        category: "Impuestos",
        title: "SAT para Principiantes: Lo que Todo Emprendedor Debe Saber",
        description: "Desmitifica el sistema tributario mexicano y entiende tus obligaciones \
                      fiscales básicas.",
    },
    Article {
        category: "Estrategia",
        title: "Cómo Fijar los Precios de tus Productos o Servicios",
        description: "Estrategias y métodos para establecer precios competitivos que aseguren tu \
                      margen de ganancia.",
    },
    Article {
        category: "Marketing",
        title: "Marketing Digital para Dummies: Atrae Clientes sin Gastar una Fortuna",
        description: "Descubre herramientas y tácticas de bajo costo para promocionar tu negocio \
                      en línea.",
    },
];

/// The learning center catalog, in display order.
pub fn articles() -> &'static [Article] {
    ARTICLES
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog() {
        let list = articles();
        assert_eq!(list.len(), 5);
        assert_eq!(list[0].category, "Formalización");
        assert!(list[2].title.starts_with("SAT"));
        assert!(list.iter().all(|a| !a.description.contains("  ")));
    }
}
